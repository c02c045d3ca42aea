//! Frontier queue: channels admitted to the graph but not yet fully scanned.
//!
//! Traversal is breadth-first (oldest entry first). An entry is only removed
//! by [`Frontier::complete`], so a crash mid-scan leaves it for the next
//! worker to pick up.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{FrontierError, StoreResult};
use crate::traits::GraphStore;
use crate::types::ChannelId;

pub struct Frontier<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for Frontier<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: GraphStore + ?Sized> Frontier<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Add `channel` unless it is already pending or already a node.
    pub async fn enqueue(&self, channel: ChannelId) -> StoreResult<bool> {
        let inserted = self.store.enqueue_if_unvisited(channel, Utc::now()).await?;
        if inserted {
            tracing::debug!(channel_id = %channel, "Channel enqueued");
        }
        Ok(inserted)
    }

    /// Earliest pending channel. The entry stays until [`Self::complete`].
    pub async fn take_next(&self) -> Result<ChannelId, FrontierError> {
        self.take_next_excluding(&HashSet::new()).await
    }

    /// Earliest pending channel not in `claimed`.
    pub async fn take_next_excluding(
        &self,
        claimed: &HashSet<ChannelId>,
    ) -> Result<ChannelId, FrontierError> {
        // One slot past the claimed set guarantees an unclaimed entry is seen
        let window = claimed.len() + 1;
        let entries = self.store.peek_frontier(window).await?;

        entries
            .into_iter()
            .map(|entry| entry.channel_id)
            .find(|id| !claimed.contains(id))
            .ok_or(FrontierError::Empty)
    }

    /// Remove a fully scanned channel.
    pub async fn complete(&self, channel: ChannelId) -> StoreResult<()> {
        let removed = self.store.remove_frontier_entry(channel).await?;
        if !removed {
            tracing::warn!(channel_id = %channel, "Completed channel had no frontier entry");
        }
        Ok(())
    }

    pub async fn len(&self) -> StoreResult<usize> {
        self.store.frontier_len().await
    }

    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryGraphStore;
    use crate::types::{ChannelMetadata, ChannelNode};

    fn frontier() -> (Arc<MemoryGraphStore>, Frontier<MemoryGraphStore>) {
        let store = Arc::new(MemoryGraphStore::new());
        (store.clone(), Frontier::new(store))
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent() {
        let (_, frontier) = frontier();

        assert!(frontier.enqueue(ChannelId(1)).await.unwrap());
        assert!(!frontier.enqueue(ChannelId(1)).await.unwrap());
        assert_eq!(frontier.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_skips_visited_channels() {
        let (store, frontier) = frontier();
        let metadata = ChannelMetadata {
            id: ChannelId(5),
            title: "Visited".to_string(),
            username: None,
            date: None,
            excluded: false,
        };
        store
            .upsert_node(&ChannelNode::from_metadata(&metadata, Utc::now()))
            .await
            .unwrap();

        assert!(!frontier.enqueue(ChannelId(5)).await.unwrap());
        assert!(frontier.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_take_next_is_fifo_and_non_destructive() {
        let (_, frontier) = frontier();
        frontier.enqueue(ChannelId(3)).await.unwrap();
        frontier.enqueue(ChannelId(1)).await.unwrap();
        frontier.enqueue(ChannelId(2)).await.unwrap();

        assert_eq!(frontier.take_next().await.unwrap(), ChannelId(3));
        assert_eq!(frontier.take_next().await.unwrap(), ChannelId(3));

        frontier.complete(ChannelId(3)).await.unwrap();
        assert_eq!(frontier.take_next().await.unwrap(), ChannelId(1));
    }

    #[tokio::test]
    async fn test_take_next_excluding_claimed() {
        let (_, frontier) = frontier();
        frontier.enqueue(ChannelId(1)).await.unwrap();
        frontier.enqueue(ChannelId(2)).await.unwrap();

        let claimed: HashSet<_> = [ChannelId(1)].into_iter().collect();
        assert_eq!(frontier.take_next_excluding(&claimed).await.unwrap(), ChannelId(2));

        let claimed: HashSet<_> = [ChannelId(1), ChannelId(2)].into_iter().collect();
        assert!(matches!(
            frontier.take_next_excluding(&claimed).await,
            Err(FrontierError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_empty_frontier() {
        let (_, frontier) = frontier();
        assert!(matches!(frontier.take_next().await, Err(FrontierError::Empty)));
    }
}
