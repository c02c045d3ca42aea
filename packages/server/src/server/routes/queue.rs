use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    Json,
};
use channel_crawler::{ChannelId, FrontierEntry};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};

const MAX_PEEK: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct QueueParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct NewQueueEntry {
    pub channel_id: i64,
    #[serde(default)]
    pub enqueued_at: Option<DateTime<Utc>>,
}

/// Oldest pending entries (one unless `limit` says otherwise).
pub async fn peek_queue(
    Extension(state): Extension<AppState>,
    params: Result<Query<QueueParams>, QueryRejection>,
) -> ApiResult<Json<Vec<FrontierEntry>>> {
    let Query(params) = params?;
    let limit = params.limit.unwrap_or(1).clamp(1, MAX_PEEK);

    Ok(Json(state.store.peek_frontier(limit).await?))
}

pub async fn push_queue(
    Extension(state): Extension<AppState>,
    payload: Result<Json<NewQueueEntry>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<FrontierEntry>)> {
    let Json(body) = payload?;

    let entry = FrontierEntry {
        channel_id: ChannelId(body.channel_id),
        enqueued_at: body.enqueued_at.unwrap_or_else(Utc::now),
    };

    let created = state.store.push_frontier_entry(&entry).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn remove_queue_entry(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if !state.store.remove_frontier_entry(ChannelId(id)).await? {
        return Err(ApiError::NotFound(format!("frontier entry not found: {}", id)));
    }
    Ok(StatusCode::NO_CONTENT)
}
