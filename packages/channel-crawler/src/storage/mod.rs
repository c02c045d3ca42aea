//! Graph store implementations.

pub mod memory;
pub use memory::MemoryGraphStore;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::PostgresGraphStore;
