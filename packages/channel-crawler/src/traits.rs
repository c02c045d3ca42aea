use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;

use crate::error::{SourceResult, StoreResult};
use crate::types::*;

/// Lazy, finite, single-pass stream of a channel's messages
pub type ItemStream<'a> = BoxStream<'a, SourceResult<ContentItem>>;

// ============================================================================
// CONTENT SOURCE: remote channel resolution + message streaming
// ============================================================================

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Resolve a locator to current channel metadata.
    ///
    /// `SourceError::NotFound` means the locator points nowhere; transient
    /// failures use the other variants.
    async fn resolve(&self, locator: &Locator) -> SourceResult<ChannelMetadata>;

    /// Stream every message of a channel, in the source's own order.
    fn stream_items(&self, channel: ChannelId) -> ItemStream<'_>;
}

// ============================================================================
// GRAPH STORE: the single source of truth for nodes, edges and frontier
// ============================================================================

/// Operations the crawl core needs.
///
/// Every mutating call is atomic at its key. Implementations retry their own
/// concurrency conflicts and never surface them as distinct outcomes.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert or refresh a node. `discovered_at` of an existing node is kept.
    async fn upsert_node(&self, node: &ChannelNode) -> StoreResult<()>;

    async fn get_node(&self, id: ChannelId) -> StoreResult<Option<ChannelNode>>;

    async fn node_exists(&self, id: ChannelId) -> StoreResult<bool> {
        Ok(self.get_node(id).await?.is_some())
    }

    /// Upsert the node and, iff it did not exist before, add a frontier entry
    /// stamped `node.discovered_at`. One atomic step.
    async fn admit_node(&self, node: &ChannelNode) -> StoreResult<Admission>;

    /// Add a frontier entry iff neither an entry nor a node exists for `id`.
    /// Returns whether an entry was inserted.
    async fn enqueue_if_unvisited(&self, id: ChannelId, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Oldest entries first (enqueue time, then insertion order).
    async fn peek_frontier(&self, limit: usize) -> StoreResult<Vec<FrontierEntry>>;

    /// Returns whether an entry was removed.
    async fn remove_frontier_entry(&self, id: ChannelId) -> StoreResult<bool>;

    async fn frontier_len(&self) -> StoreResult<usize>;

    async fn get_edge(&self, key: &EdgeKey) -> StoreResult<Option<ChannelEdge>>;

    /// Create the edge with strength 1 or increment it, reconciling the kind
    /// with [`ReferenceKind::reconcile`]. Both endpoints must already be nodes.
    async fn record_edge(
        &self,
        key: &EdgeKey,
        kind: ReferenceKind,
        at: DateTime<Utc>,
    ) -> StoreResult<ChannelEdge>;
}

// ============================================================================
// GRAPH CATALOG: read/write surface for external consumers
// ============================================================================

/// Strict CRUD and lookup operations exposed through the HTTP façade.
///
/// Creates reject duplicates with `StoreError::Conflict` instead of merging.
#[async_trait]
pub trait GraphCatalog: GraphStore {
    /// Case-insensitive substring match on username.
    async fn find_nodes_by_username(
        &self,
        query: &str,
        limit: usize,
    ) -> StoreResult<Vec<ChannelNode>>;

    /// Case-insensitive substring match on title.
    async fn find_nodes_by_title(&self, query: &str, limit: usize)
        -> StoreResult<Vec<ChannelNode>>;

    async fn list_edges(&self, filter: &EdgeFilter) -> StoreResult<Vec<ChannelEdge>>;

    async fn create_node(&self, node: &ChannelNode) -> StoreResult<ChannelNode>;

    async fn update_node(&self, node: &ChannelNode) -> StoreResult<ChannelNode>;

    /// Fails with `Conflict` while any edge touches the node.
    async fn delete_node(&self, id: ChannelId) -> StoreResult<()>;

    /// Fails with `NotFound` if either endpoint is not a node.
    async fn create_edge(&self, edge: &ChannelEdge) -> StoreResult<ChannelEdge>;

    async fn update_edge(&self, key: &EdgeKey, update: &EdgeUpdate) -> StoreResult<ChannelEdge>;

    async fn delete_edge(&self, key: &EdgeKey) -> StoreResult<()>;

    /// Drop every outgoing edge of a channel (reset before a deliberate
    /// re-crawl). Returns the number of edges removed.
    async fn delete_outgoing_edges(&self, origin: ChannelId) -> StoreResult<u64>;

    /// Strict frontier insert: `Conflict` if an entry already exists.
    async fn push_frontier_entry(&self, entry: &FrontierEntry) -> StoreResult<FrontierEntry>;
}
