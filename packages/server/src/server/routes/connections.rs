use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    Json,
};
use channel_crawler::{
    ChannelEdge, ChannelId, Direction, EdgeFilter, EdgeKey, EdgeUpdate, ReferenceKind,
    TimeBucket,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};

#[derive(Debug, Default, Deserialize)]
pub struct ConnectionParams {
    pub direction: Option<String>,
    pub bucket: Option<String>,
    pub kind: Option<String>,
}

impl ConnectionParams {
    fn into_filter(self, channel: ChannelId) -> ApiResult<EdgeFilter> {
        let direction = match self.direction.as_deref() {
            None | Some("out") | Some("outgoing") => Direction::Out,
            Some("in") | Some("incoming") => Direction::In,
            Some(other) => {
                return Err(ApiError::BadRequest(format!(
                    "invalid direction {:?} (expected out or in)",
                    other
                )))
            }
        };

        Ok(EdgeFilter {
            channel,
            direction,
            bucket: self.bucket.as_deref().map(str::parse::<TimeBucket>).transpose()?,
            kind: self.kind.as_deref().map(str::parse::<ReferenceKind>).transpose()?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct NewConnection {
    pub origin: i64,
    pub destination: i64,
    pub bucket: TimeBucket,
    #[serde(default = "default_strength")]
    pub strength: i64,
    pub kind: ReferenceKind,
}

fn default_strength() -> i64 {
    1
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub deleted: u64,
}

fn require_positive(strength: i64) -> ApiResult<()> {
    if strength < 1 {
        return Err(ApiError::BadRequest(format!(
            "strength must be positive, got {}",
            strength
        )));
    }
    Ok(())
}

fn edge_key(origin: i64, destination: i64, bucket: &str) -> ApiResult<EdgeKey> {
    Ok(EdgeKey::new(
        ChannelId(origin),
        ChannelId(destination),
        bucket.parse::<TimeBucket>()?,
    ))
}

pub async fn list_connections(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    params: Result<Query<ConnectionParams>, QueryRejection>,
) -> ApiResult<Json<Vec<ChannelEdge>>> {
    let Query(params) = params?;
    let filter = params.into_filter(ChannelId(id))?;

    Ok(Json(state.store.list_edges(&filter).await?))
}

pub async fn create_connection(
    Extension(state): Extension<AppState>,
    payload: Result<Json<NewConnection>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ChannelEdge>)> {
    let Json(body) = payload?;
    require_positive(body.strength)?;

    let edge = ChannelEdge {
        origin: ChannelId(body.origin),
        destination: ChannelId(body.destination),
        bucket: body.bucket,
        strength: body.strength,
        kind: body.kind,
        updated_at: Utc::now(),
    };

    let created = state.store.create_edge(&edge).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_connection(
    Extension(state): Extension<AppState>,
    Path((origin, destination, bucket)): Path<(i64, i64, String)>,
    payload: Result<Json<EdgeUpdate>, JsonRejection>,
) -> ApiResult<Json<ChannelEdge>> {
    let key = edge_key(origin, destination, &bucket)?;
    let Json(update) = payload?;

    if update.strength.is_none() && update.kind.is_none() {
        return Err(ApiError::BadRequest(
            "update needs strength or kind".to_string(),
        ));
    }
    if let Some(strength) = update.strength {
        require_positive(strength)?;
    }

    Ok(Json(state.store.update_edge(&key, &update).await?))
}

pub async fn delete_connection(
    Extension(state): Extension<AppState>,
    Path((origin, destination, bucket)): Path<(i64, i64, String)>,
) -> ApiResult<StatusCode> {
    let key = edge_key(origin, destination, &bucket)?;
    state.store.delete_edge(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Drop every outgoing connection of a channel ahead of a deliberate re-crawl.
pub async fn reset_connections(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ResetResponse>> {
    let deleted = state.store.delete_outgoing_edges(ChannelId(id)).await?;
    tracing::info!(channel_id = id, deleted, "Outgoing connections reset");
    Ok(Json(ResetResponse { deleted }))
}
