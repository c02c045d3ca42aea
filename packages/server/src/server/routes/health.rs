use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::server::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    store: StoreHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    connection_pool: Option<ConnectionPoolHealth>,
}

#[derive(Serialize)]
pub struct StoreHealth {
    backend: &'static str,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    frontier_len: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct ConnectionPoolHealth {
    size: u32,
    idle_connections: usize,
    max_connections: u32,
}

/// Health check endpoint
///
/// Checks graph store responsiveness (a frontier count, bounded to 5s) and
/// reports connection pool utilization when database-backed.
///
/// Returns 200 OK if the store answers, 503 Service Unavailable otherwise.
pub async fn health_handler(
    Extension(state): Extension<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let backend = if state.db_pool.is_some() {
        "postgres"
    } else {
        "memory"
    };

    let store_health = match tokio::time::timeout(
        std::time::Duration::from_secs(5),
        state.store.frontier_len(),
    )
    .await
    {
        Ok(Ok(frontier_len)) => StoreHealth {
            backend,
            status: "ok".to_string(),
            frontier_len: Some(frontier_len),
            error: None,
        },
        Ok(Err(e)) => StoreHealth {
            backend,
            status: "error".to_string(),
            frontier_len: None,
            error: Some(format!("Query failed: {}", e)),
        },
        Err(_) => StoreHealth {
            backend,
            status: "error".to_string(),
            frontier_len: None,
            error: Some("Query timeout (>5s)".to_string()),
        },
    };

    let connection_pool = state.db_pool.as_ref().map(|pool| ConnectionPoolHealth {
        size: pool.size(),
        idle_connections: pool.num_idle(),
        max_connections: pool.options().get_max_connections(),
    });

    let is_healthy = store_health.status == "ok";
    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            store: store_health,
            connection_pool,
        }),
    )
}
