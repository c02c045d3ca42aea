//! Mock content source for testing.
//!
//! Provides a scripted in-memory [`ContentSource`]: channels, their messages,
//! and injectable failures.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::error::{SourceError, SourceResult};
use crate::traits::{ContentSource, ItemStream};
use crate::types::{ChannelId, ChannelMetadata, ContentItem, Locator};

/// Scripted content source.
///
/// # Example
///
/// ```rust
/// use channel_crawler::testing::MockContentSource;
/// use channel_crawler::types::{ChannelId, ContentItem};
/// use chrono::Utc;
///
/// let source = MockContentSource::new()
///     .with_channel(MockContentSource::channel(1, "Seed", Some("seed")))
///     .with_item(ChannelId(1), ContentItem::new(1, Utc::now(), "hello"));
/// ```
#[derive(Default, Clone)]
pub struct MockContentSource {
    state: Arc<RwLock<MockState>>,
}

#[derive(Default)]
struct MockState {
    channels: HashMap<ChannelId, ChannelMetadata>,
    /// Lowercased username to id
    usernames: HashMap<String, ChannelId>,
    items: HashMap<ChannelId, Vec<ContentItem>>,
    /// Locators whose resolution fails as unavailable
    unavailable: HashSet<Locator>,
    /// Streams that fail after yielding this many items
    stream_failures: HashMap<ChannelId, usize>,
    /// Streams that never end after their scripted items
    stalled: HashSet<ChannelId>,
    resolve_calls: Vec<Locator>,
    stream_calls: Vec<ChannelId>,
}

impl MockContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcast channel metadata shorthand.
    pub fn channel(id: i64, title: &str, username: Option<&str>) -> ChannelMetadata {
        ChannelMetadata {
            id: ChannelId(id),
            title: title.to_string(),
            username: username.map(str::to_string),
            date: None,
            excluded: false,
        }
    }

    /// Group (excluded) channel metadata shorthand.
    pub fn group(id: i64, title: &str, username: Option<&str>) -> ChannelMetadata {
        ChannelMetadata {
            excluded: true,
            ..Self::channel(id, title, username)
        }
    }

    pub fn add_channel(&self, metadata: ChannelMetadata) {
        let mut state = self.state.write().unwrap();
        if let Some(username) = &metadata.username {
            state.usernames.insert(username.to_lowercase(), metadata.id);
        }
        state.channels.insert(metadata.id, metadata);
    }

    /// Remove a channel so that it no longer resolves.
    pub fn remove_channel(&self, id: ChannelId) {
        let mut state = self.state.write().unwrap();
        state.channels.remove(&id);
        state.usernames.retain(|_, v| *v != id);
    }

    pub fn add_item(&self, channel: ChannelId, item: ContentItem) {
        let mut state = self.state.write().unwrap();
        state.items.entry(channel).or_default().push(item);
    }

    pub fn set_unavailable(&self, locator: Locator, unavailable: bool) {
        let mut state = self.state.write().unwrap();
        if unavailable {
            state.unavailable.insert(locator);
        } else {
            state.unavailable.remove(&locator);
        }
    }

    /// Make the channel's stream fail after `after` items; `None` clears it.
    pub fn set_stream_failure(&self, channel: ChannelId, after: Option<usize>) {
        let mut state = self.state.write().unwrap();
        match after {
            Some(n) => state.stream_failures.insert(channel, n),
            None => state.stream_failures.remove(&channel),
        };
    }

    /// Keep the channel's stream open (pending) after its last item.
    pub fn set_stalled(&self, channel: ChannelId, stalled: bool) {
        let mut state = self.state.write().unwrap();
        if stalled {
            state.stalled.insert(channel);
        } else {
            state.stalled.remove(&channel);
        }
    }

    pub fn with_channel(self, metadata: ChannelMetadata) -> Self {
        self.add_channel(metadata);
        self
    }

    pub fn with_item(self, channel: ChannelId, item: ContentItem) -> Self {
        self.add_item(channel, item);
        self
    }

    pub fn with_items(self, channel: ChannelId, items: Vec<ContentItem>) -> Self {
        for item in items {
            self.add_item(channel, item);
        }
        self
    }

    pub fn with_unavailable(self, locator: Locator) -> Self {
        self.set_unavailable(locator, true);
        self
    }

    pub fn with_stream_failure(self, channel: ChannelId, after: usize) -> Self {
        self.set_stream_failure(channel, Some(after));
        self
    }

    pub fn with_stalled_stream(self, channel: ChannelId) -> Self {
        self.set_stalled(channel, true);
        self
    }

    pub fn resolve_calls(&self) -> Vec<Locator> {
        self.state.read().unwrap().resolve_calls.clone()
    }

    pub fn resolve_call_count(&self) -> usize {
        self.state.read().unwrap().resolve_calls.len()
    }

    pub fn stream_calls(&self) -> Vec<ChannelId> {
        self.state.read().unwrap().stream_calls.clone()
    }

    pub fn reset_calls(&self) {
        let mut state = self.state.write().unwrap();
        state.resolve_calls.clear();
        state.stream_calls.clear();
    }
}

#[async_trait]
impl ContentSource for MockContentSource {
    async fn resolve(&self, locator: &Locator) -> SourceResult<ChannelMetadata> {
        let mut state = self.state.write().unwrap();
        state.resolve_calls.push(locator.clone());

        if state.unavailable.contains(locator) {
            return Err(SourceError::Unavailable(format!(
                "scripted outage resolving {}",
                locator
            )));
        }

        let id = match locator {
            Locator::Id(id) => Some(*id),
            Locator::Username(name) => state.usernames.get(&name.to_lowercase()).copied(),
        };

        id.and_then(|id| state.channels.get(&id).cloned())
            .ok_or_else(|| SourceError::NotFound {
                locator: locator.to_string(),
            })
    }

    fn stream_items(&self, channel: ChannelId) -> ItemStream<'_> {
        let mut state = self.state.write().unwrap();
        state.stream_calls.push(channel);

        if !state.channels.contains_key(&channel) {
            let err = SourceError::NotFound {
                locator: channel.to_string(),
            };
            return stream::iter(vec![Err(err)]).boxed();
        }

        let items = state.items.get(&channel).cloned().unwrap_or_default();
        let mut results: Vec<SourceResult<ContentItem>> = match state.stream_failures.get(&channel) {
            Some(&after) => items.into_iter().take(after).map(Ok).collect(),
            None => items.into_iter().map(Ok).collect(),
        };
        if state.stream_failures.contains_key(&channel) {
            results.push(Err(SourceError::Unavailable(format!(
                "scripted stream failure for channel {}",
                channel
            ))));
        }

        if state.stalled.contains(&channel) {
            return stream::iter(results).chain(stream::pending()).boxed();
        }
        stream::iter(results).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_stalled_stream_stays_open() {
        let source = MockContentSource::new()
            .with_channel(MockContentSource::channel(1, "One", None))
            .with_item(ChannelId(1), ContentItem::new(1, Utc::now(), "first"))
            .with_stalled_stream(ChannelId(1));

        let mut items = source.stream_items(ChannelId(1));
        assert_eq!(items.next().await.unwrap().unwrap().id, 1);

        let next = tokio::time::timeout(std::time::Duration::from_millis(20), items.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn test_resolve_username_case_insensitive() {
        let source = MockContentSource::new().with_channel(MockContentSource::channel(
            7,
            "Seven",
            Some("Seven_News"),
        ));

        let metadata = source.resolve(&Locator::username("seven_news")).await.unwrap();
        assert_eq!(metadata.id, ChannelId(7));
        assert_eq!(source.resolve_call_count(), 1);
    }

    #[tokio::test]
    async fn test_stream_failure_after_items() {
        let source = MockContentSource::new()
            .with_channel(MockContentSource::channel(1, "One", None))
            .with_items(
                ChannelId(1),
                vec![
                    ContentItem::new(1, Utc::now(), "a"),
                    ContentItem::new(2, Utc::now(), "b"),
                ],
            )
            .with_stream_failure(ChannelId(1), 1);

        let mut stream = source.stream_items(ChannelId(1));
        assert_eq!(stream.try_next().await.unwrap().unwrap().id, 1);
        assert!(stream.try_next().await.is_err());
    }
}
