//! Edge aggregation: one record per (origin, destination, bucket).

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::error::StoreResult;
use crate::traits::GraphStore;
use crate::types::{ChannelEdge, ChannelId, EdgeKey, ReferenceKind, TimeBucket};

pub struct EdgeAggregator<S: ?Sized> {
    store: Arc<S>,
    split_instant: DateTime<Utc>,
}

impl<S: ?Sized> Clone for EdgeAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            split_instant: self.split_instant,
        }
    }
}

impl<S: GraphStore + ?Sized> EdgeAggregator<S> {
    pub fn new(store: Arc<S>, split_instant: DateTime<Utc>) -> Self {
        Self {
            store,
            split_instant,
        }
    }

    pub fn split_instant(&self) -> DateTime<Utc> {
        self.split_instant
    }

    pub fn bucket_for(&self, observed_at: DateTime<Utc>) -> TimeBucket {
        TimeBucket::for_instant(observed_at, self.split_instant)
    }

    /// Count one reference from `origin` to `destination`.
    ///
    /// Replaying a channel after a crash counts its references again; edge
    /// strength is at-least-once.
    pub async fn record_reference(
        &self,
        origin: ChannelId,
        destination: ChannelId,
        observed_at: DateTime<Utc>,
        kind: ReferenceKind,
    ) -> StoreResult<ChannelEdge> {
        let key = EdgeKey::new(origin, destination, self.bucket_for(observed_at));
        let edge = self.store.record_edge(&key, kind, Utc::now()).await?;

        tracing::debug!(
            edge = %key,
            observed_kind = %kind,
            kind = %edge.kind,
            strength = edge.strength,
            "Reference recorded"
        );

        Ok(edge)
    }
}
