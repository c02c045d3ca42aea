//! JSON bridge client for a messaging-service gateway.
//!
//! The bridge exposes two endpoints:
//!
//! - `GET {base}/entities/{locator}` returns [`ChannelMetadata`]; 404 means
//!   the locator resolves to nothing.
//! - `GET {base}/channels/{id}/messages?offset_id=&limit=` returns a JSON
//!   array of [`ContentItem`], newest first, with ids strictly below
//!   `offset_id` (0 means "from the newest"). An empty page ends the channel.

use async_stream::stream;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::error::{SourceError, SourceResult};
use crate::traits::{ContentSource, ItemStream};
use crate::types::{ChannelId, ChannelMetadata, ContentItem, Locator};

const DEFAULT_PAGE_SIZE: u32 = 100;

pub struct HttpContentSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    page_size: u32,
}

impl HttpContentSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            token: None,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> SourceResult<Option<T>> {
        let mut request = self.client.get(url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await?;
        let status = resp.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Protocol(format!("{}: {}", status, body)));
        }

        let value = resp
            .json::<T>()
            .await
            .map_err(|e| SourceError::Protocol(e.to_string()))?;
        Ok(Some(value))
    }

    async fn fetch_page(&self, channel: ChannelId, offset_id: i64) -> SourceResult<Vec<ContentItem>> {
        let url = format!("{}/channels/{}/messages", self.base_url, channel);
        let query = [
            ("offset_id", offset_id.to_string()),
            ("limit", self.page_size.to_string()),
        ];

        self.get_json(&url, &query)
            .await?
            .ok_or_else(|| SourceError::NotFound {
                locator: channel.to_string(),
            })
    }
}

fn locator_segment(locator: &Locator) -> String {
    match locator {
        Locator::Id(id) => id.to_string(),
        Locator::Username(name) => name.clone(),
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn resolve(&self, locator: &Locator) -> SourceResult<ChannelMetadata> {
        let url = format!("{}/entities/{}", self.base_url, locator_segment(locator));

        self.get_json(&url, &[])
            .await?
            .ok_or_else(|| SourceError::NotFound {
                locator: locator.to_string(),
            })
    }

    fn stream_items(&self, channel: ChannelId) -> ItemStream<'_> {
        Box::pin(stream! {
            let mut offset_id = 0i64;

            loop {
                let page = match self.fetch_page(channel, offset_id).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };
                let Some(last) = page.last().map(|item| item.id) else {
                    break;
                };

                tracing::trace!(channel_id = %channel, offset_id, items = page.len(), "Fetched message page");

                for item in page {
                    yield Ok(item);
                }

                // Pages must move strictly towards older messages
                if offset_id != 0 && last >= offset_id {
                    yield Err(SourceError::Protocol(format!(
                        "message paging did not advance past {} for channel {}",
                        offset_id, channel
                    )));
                    return;
                }
                if last <= 1 {
                    break;
                }
                offset_id = last;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::Utc;
    use futures::TryStreamExt;
    use std::collections::HashMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    async fn entity(Path(locator): Path<String>) -> Result<Json<ChannelMetadata>, AxumStatus> {
        match locator.as_str() {
            "news" | "10" => Ok(Json(ChannelMetadata {
                id: ChannelId(10),
                title: "News".to_string(),
                username: Some("news".to_string()),
                date: None,
                excluded: false,
            })),
            "flaky" => Err(AxumStatus::BAD_GATEWAY),
            _ => Err(AxumStatus::NOT_FOUND),
        }
    }

    /// Five messages (ids 5..=1), served newest first, `limit` at a time.
    async fn messages(
        Path(_channel): Path<i64>,
        Query(params): Query<HashMap<String, i64>>,
    ) -> Json<Vec<ContentItem>> {
        let offset = params.get("offset_id").copied().unwrap_or(0);
        let limit = params.get("limit").copied().unwrap_or(100) as usize;
        let upper = if offset == 0 { 5 } else { offset - 1 };

        let page = (1..=upper)
            .rev()
            .take(limit)
            .map(|id| ContentItem::new(id, Utc::now(), format!("message {}", id)))
            .collect();
        Json(page)
    }

    fn router() -> Router {
        Router::new()
            .route("/entities/:locator", get(entity))
            .route("/channels/:channel/messages", get(messages))
    }

    #[tokio::test]
    async fn test_resolve_by_username_and_id() {
        let source = HttpContentSource::new(serve(router()).await);

        let by_name = source.resolve(&Locator::username("news")).await.unwrap();
        assert_eq!(by_name.id, ChannelId(10));

        let by_id = source.resolve(&Locator::Id(ChannelId(10))).await.unwrap();
        assert_eq!(by_id.title, "News");
    }

    #[tokio::test]
    async fn test_resolve_distinguishes_missing_from_unavailable() {
        let source = HttpContentSource::new(serve(router()).await);

        let missing = source.resolve(&Locator::username("ghost")).await.unwrap_err();
        assert!(matches!(missing, SourceError::NotFound { .. }));
        assert!(!missing.is_transient());

        let flaky = source.resolve(&Locator::username("flaky")).await.unwrap_err();
        assert!(matches!(flaky, SourceError::Unavailable(_)));
        assert!(flaky.is_transient());
    }

    #[tokio::test]
    async fn test_stream_items_pages_until_exhausted() {
        let source = HttpContentSource::new(serve(router()).await).with_page_size(2);

        let items: Vec<ContentItem> = source
            .stream_items(ChannelId(10))
            .try_collect()
            .await
            .unwrap();

        let ids: Vec<i64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![5, 4, 3, 2, 1]);
    }

    #[tokio::test]
    async fn test_unreachable_source_is_transient() {
        // Nothing listens on port 9 of localhost in the test environment
        let source = HttpContentSource::new("http://127.0.0.1:9");
        let err = source.resolve(&Locator::username("news")).await.unwrap_err();
        assert!(err.is_transient());
    }
}
