// HTTP server setup (Axum, graph store API)
pub mod app;
pub mod error;
pub mod routes;

pub use app::*;
pub use error::{ApiError, ApiResult};
