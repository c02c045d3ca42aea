//! Application setup and router configuration.

use std::time::Duration;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::server::routes::{
    create_channel, create_connection, delete_channel, delete_connection, find_by_title,
    find_by_username, get_channel, health_handler, list_connections, peek_queue, push_queue,
    remove_queue_entry, reset_connections, update_channel, update_connection,
};
use crate::store::StoreHandle;

/// Shared application state
pub type AppState = StoreHandle;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        // Channels (nodes)
        .route("/channels", post(create_channel))
        .route(
            "/channels/:id",
            get(get_channel).put(update_channel).delete(delete_channel),
        )
        .route("/channels/by-username/:query", get(find_by_username))
        .route("/channels/by-title/:query", get(find_by_title))
        // Connections (edges)
        .route(
            "/channels/:id/connections",
            get(list_connections).delete(reset_connections),
        )
        .route("/connections", post(create_connection))
        .route(
            "/connections/:origin/:destination/:bucket",
            patch(update_connection).delete(delete_connection),
        )
        // Frontier
        .route("/queue", get(peek_queue).post(push_queue))
        .route("/queue/:id", axum::routing::delete(remove_queue_entry))
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(Extension(state))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
