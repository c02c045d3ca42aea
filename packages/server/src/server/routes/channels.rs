use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    Json,
};
use channel_crawler::{ChannelId, ChannelNode};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};

const DEFAULT_SEARCH_LIMIT: usize = 3;
const MAX_SEARCH_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct NewChannel {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub discovered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ChannelUpdate {
    pub title: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub limit: Option<usize>,
}

impl SearchParams {
    fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_SEARCH_LIMIT)
            .clamp(1, MAX_SEARCH_LIMIT)
    }
}

fn normalize_username(username: Option<String>) -> Option<String> {
    username
        .map(|u| u.trim().trim_start_matches('@').to_string())
        .filter(|u| !u.is_empty())
}

fn require_title(title: &str) -> ApiResult<()> {
    if title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }
    Ok(())
}

pub async fn get_channel(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<ChannelNode>> {
    state
        .store
        .get_node(ChannelId(id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("channel not found: {}", id)))
}

pub async fn create_channel(
    Extension(state): Extension<AppState>,
    payload: Result<Json<NewChannel>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ChannelNode>)> {
    let Json(body) = payload?;
    require_title(&body.title)?;

    let node = ChannelNode {
        id: ChannelId(body.id),
        title: body.title,
        username: normalize_username(body.username),
        date: body.date,
        discovered_at: body.discovered_at.unwrap_or_else(Utc::now),
    };

    let created = state.store.create_node(&node).await?;
    tracing::info!(channel_id = %created.id, "Channel created via API");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_channel(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
    payload: Result<Json<ChannelUpdate>, JsonRejection>,
) -> ApiResult<Json<ChannelNode>> {
    let Json(body) = payload?;
    require_title(&body.title)?;

    // discovered_at is never changed by an update
    let node = ChannelNode {
        id: ChannelId(id),
        title: body.title,
        username: normalize_username(body.username),
        date: body.date,
        discovered_at: Utc::now(),
    };

    Ok(Json(state.store.update_node(&node).await?))
}

pub async fn delete_channel(
    Extension(state): Extension<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.store.delete_node(ChannelId(id)).await?;
    tracing::info!(channel_id = id, "Channel deleted via API");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn find_by_username(
    Extension(state): Extension<AppState>,
    Path(query): Path<String>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<Json<Vec<ChannelNode>>> {
    let Query(params) = params?;
    let query = query.trim().trim_start_matches('@');

    let nodes = state
        .store
        .find_nodes_by_username(query, params.limit())
        .await?;
    Ok(Json(nodes))
}

pub async fn find_by_title(
    Extension(state): Extension<AppState>,
    Path(query): Path<String>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ApiResult<Json<Vec<ChannelNode>>> {
    let Query(params) = params?;

    let nodes = state
        .store
        .find_nodes_by_title(query.trim(), params.limit())
        .await?;
    Ok(Json(nodes))
}
