//! Visited registry: a channel is visited iff it has a node.

use chrono::Utc;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::traits::GraphStore;
use crate::types::{Admission, ChannelId, ChannelMetadata, ChannelNode};

pub struct VisitedRegistry<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for VisitedRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: GraphStore + ?Sized> VisitedRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn is_visited(&self, channel: ChannelId) -> StoreResult<bool> {
        self.store.node_exists(channel).await
    }

    /// Admit a resolved reference destination: refresh its node, and put it on
    /// the frontier if this is the first time it is seen.
    pub async fn admit(&self, metadata: &ChannelMetadata) -> StoreResult<Admission> {
        let node = ChannelNode::from_metadata(metadata, Utc::now());
        let admission = self.store.admit_node(&node).await?;

        if admission == Admission::Discovered {
            tracing::info!(
                channel_id = %metadata.id,
                title = %metadata.title,
                username = ?metadata.username,
                "Discovered new channel"
            );
        }

        Ok(admission)
    }

    /// Refresh the node of the channel being scanned, without touching the
    /// frontier.
    pub async fn refresh(&self, metadata: &ChannelMetadata) -> StoreResult<()> {
        let node = ChannelNode::from_metadata(metadata, Utc::now());
        self.store.upsert_node(&node).await
    }
}
