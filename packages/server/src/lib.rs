// Channel Graph - process wiring
//
// Configuration, logging and store selection shared by the `crawler` and
// `server` binaries, plus the axum API over the graph store.

pub mod config;
pub mod server;
pub mod store;
pub mod telemetry;

pub use config::*;
pub use store::{connect_store, StoreHandle};
