//! In-memory graph store for testing and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{StoreError, StoreResult};
use crate::traits::{GraphCatalog, GraphStore};
use crate::types::*;

/// In-memory storage for nodes, edges and the frontier.
///
/// All state sits behind one mutex, so every operation is trivially atomic.
/// Not suitable for production: data is lost on restart.
pub struct MemoryGraphStore {
    state: Mutex<GraphState>,
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<ChannelId, ChannelNode>,
    edges: HashMap<EdgeKey, ChannelEdge>,
    /// Entry plus insertion sequence (tie-breaker for equal timestamps)
    frontier: HashMap<ChannelId, (FrontierEntry, u64)>,
    next_seq: u64,
}

impl GraphState {
    fn push_frontier(&mut self, id: ChannelId, at: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.frontier.insert(
            id,
            (
                FrontierEntry {
                    channel_id: id,
                    enqueued_at: at,
                },
                seq,
            ),
        );
    }

    fn upsert_node(&mut self, node: &ChannelNode) -> bool {
        match self.nodes.get_mut(&node.id) {
            Some(existing) => {
                existing.title = node.title.clone();
                existing.username = node.username.clone();
                existing.date = node.date;
                false
            }
            None => {
                self.nodes.insert(node.id, node.clone());
                true
            }
        }
    }

    fn require_node(&self, id: ChannelId) -> StoreResult<()> {
        if self.nodes.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::not_found("channel", id))
        }
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraphStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GraphState::default()),
        }
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, GraphState>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// All nodes, ordered by id.
    pub fn nodes(&self) -> StoreResult<Vec<ChannelNode>> {
        let mut nodes: Vec<_> = self.state()?.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    /// All edges, ordered by key.
    pub fn edges(&self) -> StoreResult<Vec<ChannelEdge>> {
        let mut edges: Vec<_> = self.state()?.edges.values().cloned().collect();
        edges.sort_by_key(|e| (e.origin, e.destination, e.bucket));
        Ok(edges)
    }

    /// Pending channel ids in traversal order.
    pub fn frontier_ids(&self) -> StoreResult<Vec<ChannelId>> {
        Ok(self
            .ordered_frontier(usize::MAX)?
            .into_iter()
            .map(|e| e.channel_id)
            .collect())
    }

    fn ordered_frontier(&self, limit: usize) -> StoreResult<Vec<FrontierEntry>> {
        let state = self.state()?;
        let mut entries: Vec<_> = state.frontier.values().collect();
        entries.sort_by_key(|(entry, seq)| (entry.enqueued_at, *seq));
        Ok(entries
            .into_iter()
            .take(limit)
            .map(|(entry, _)| entry.clone())
            .collect())
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn upsert_node(&self, node: &ChannelNode) -> StoreResult<()> {
        self.state()?.upsert_node(node);
        Ok(())
    }

    async fn get_node(&self, id: ChannelId) -> StoreResult<Option<ChannelNode>> {
        Ok(self.state()?.nodes.get(&id).cloned())
    }

    async fn admit_node(&self, node: &ChannelNode) -> StoreResult<Admission> {
        let mut state = self.state()?;
        if !state.upsert_node(node) {
            return Ok(Admission::Known);
        }
        if !state.frontier.contains_key(&node.id) {
            state.push_frontier(node.id, node.discovered_at);
        }
        Ok(Admission::Discovered)
    }

    async fn enqueue_if_unvisited(&self, id: ChannelId, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state()?;
        if state.nodes.contains_key(&id) || state.frontier.contains_key(&id) {
            return Ok(false);
        }
        state.push_frontier(id, at);
        Ok(true)
    }

    async fn peek_frontier(&self, limit: usize) -> StoreResult<Vec<FrontierEntry>> {
        self.ordered_frontier(limit)
    }

    async fn remove_frontier_entry(&self, id: ChannelId) -> StoreResult<bool> {
        Ok(self.state()?.frontier.remove(&id).is_some())
    }

    async fn frontier_len(&self) -> StoreResult<usize> {
        Ok(self.state()?.frontier.len())
    }

    async fn get_edge(&self, key: &EdgeKey) -> StoreResult<Option<ChannelEdge>> {
        Ok(self.state()?.edges.get(key).cloned())
    }

    async fn record_edge(
        &self,
        key: &EdgeKey,
        kind: ReferenceKind,
        at: DateTime<Utc>,
    ) -> StoreResult<ChannelEdge> {
        let mut state = self.state()?;
        state.require_node(key.origin)?;
        state.require_node(key.destination)?;

        let edge = state
            .edges
            .entry(*key)
            .and_modify(|edge| {
                edge.strength += 1;
                edge.kind = edge.kind.reconcile(kind);
                edge.updated_at = at;
            })
            .or_insert_with(|| ChannelEdge {
                origin: key.origin,
                destination: key.destination,
                bucket: key.bucket,
                strength: 1,
                kind,
                updated_at: at,
            });

        Ok(edge.clone())
    }
}

#[async_trait]
impl GraphCatalog for MemoryGraphStore {
    async fn find_nodes_by_username(
        &self,
        query: &str,
        limit: usize,
    ) -> StoreResult<Vec<ChannelNode>> {
        let needle = query.to_lowercase();
        Ok(self
            .nodes()?
            .into_iter()
            .filter(|n| {
                n.username
                    .as_ref()
                    .is_some_and(|u| u.to_lowercase().contains(&needle))
            })
            .take(limit)
            .collect())
    }

    async fn find_nodes_by_title(
        &self,
        query: &str,
        limit: usize,
    ) -> StoreResult<Vec<ChannelNode>> {
        let needle = query.to_lowercase();
        Ok(self
            .nodes()?
            .into_iter()
            .filter(|n| n.title.to_lowercase().contains(&needle))
            .take(limit)
            .collect())
    }

    async fn list_edges(&self, filter: &EdgeFilter) -> StoreResult<Vec<ChannelEdge>> {
        Ok(self
            .edges()?
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect())
    }

    async fn create_node(&self, node: &ChannelNode) -> StoreResult<ChannelNode> {
        let mut state = self.state()?;
        if state.nodes.contains_key(&node.id) {
            return Err(StoreError::conflict("channel", node.id));
        }
        state.nodes.insert(node.id, node.clone());
        Ok(node.clone())
    }

    async fn update_node(&self, node: &ChannelNode) -> StoreResult<ChannelNode> {
        let mut state = self.state()?;
        state.require_node(node.id)?;
        state.upsert_node(node);
        state
            .nodes
            .get(&node.id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("channel", node.id))
    }

    async fn delete_node(&self, id: ChannelId) -> StoreResult<()> {
        let mut state = self.state()?;
        state.require_node(id)?;
        if state
            .edges
            .keys()
            .any(|k| k.origin == id || k.destination == id)
        {
            return Err(StoreError::conflict("channel edges", id));
        }
        state.nodes.remove(&id);
        Ok(())
    }

    async fn create_edge(&self, edge: &ChannelEdge) -> StoreResult<ChannelEdge> {
        let mut state = self.state()?;
        state.require_node(edge.origin)?;
        state.require_node(edge.destination)?;

        let key = edge.key();
        if state.edges.contains_key(&key) {
            return Err(StoreError::conflict("edge", key));
        }
        state.edges.insert(key, edge.clone());
        Ok(edge.clone())
    }

    async fn update_edge(&self, key: &EdgeKey, update: &EdgeUpdate) -> StoreResult<ChannelEdge> {
        let mut state = self.state()?;
        let edge = state
            .edges
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found("edge", key))?;

        if let Some(strength) = update.strength {
            edge.strength = strength;
        }
        if let Some(kind) = update.kind {
            edge.kind = kind;
        }
        edge.updated_at = Utc::now();
        Ok(edge.clone())
    }

    async fn delete_edge(&self, key: &EdgeKey) -> StoreResult<()> {
        self.state()?
            .edges
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("edge", key))
    }

    async fn delete_outgoing_edges(&self, origin: ChannelId) -> StoreResult<u64> {
        let mut state = self.state()?;
        let before = state.edges.len();
        state.edges.retain(|key, _| key.origin != origin);
        Ok((before - state.edges.len()) as u64)
    }

    async fn push_frontier_entry(&self, entry: &FrontierEntry) -> StoreResult<FrontierEntry> {
        let mut state = self.state()?;
        if state.frontier.contains_key(&entry.channel_id) {
            return Err(StoreError::conflict("frontier entry", entry.channel_id));
        }
        state.push_frontier(entry.channel_id, entry.enqueued_at);
        Ok(entry.clone())
    }
}
