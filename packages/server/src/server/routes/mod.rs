// HTTP routes
pub mod channels;
pub mod connections;
pub mod health;
pub mod queue;

pub use channels::*;
pub use connections::*;
pub use health::*;
pub use queue::*;
