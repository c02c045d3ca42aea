//! Crawl driver: take a frontier entry, resolve it, scan its messages, record
//! every reference, complete the entry.
//!
//! Each channel walks `Idle → Resolving → Scanning → Completing → Idle`.
//! A worker whose frontier is empty (and has nothing in flight) is
//! `Draining`. Only a successful pass removes the frontier entry, so a
//! failed or cancelled scan is picked up again later.

use futures::future::join_all;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::aggregator::EdgeAggregator;
use crate::config::CrawlConfig;
use crate::error::{CrawlError, CrawlResult, FrontierError, SourceError};
use crate::extractor::classified_references;
use crate::frontier::Frontier;
use crate::registry::VisitedRegistry;
use crate::traits::{ContentSource, GraphStore};
use crate::types::{Admission, ChannelId, ChannelMetadata, Locator};

/// How long a worker waits when every pending channel is claimed by a peer.
const IN_FLIGHT_WAIT: Duration = Duration::from_millis(25);

/// Consecutive failed steps after which a draining worker gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Resolving { channel: ChannelId },
    Scanning { channel: ChannelMetadata },
    Completing {
        channel: ChannelId,
        outcome: ChannelOutcome,
    },
    Draining,
}

/// Result of one pass over a frontier entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    /// Every message was scanned
    Scanned,
    /// Group-type channel skipped under the exclusion policy
    Excluded,
    /// The channel no longer resolves
    Vanished,
    /// The pass failed; the frontier entry stays for a later retry
    Retained { reason: String },
}

impl ChannelOutcome {
    /// Whether the frontier entry should be removed.
    pub fn is_success(&self) -> bool {
        !matches!(self, ChannelOutcome::Retained { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub items: usize,
    /// References that produced an edge increment
    pub references: usize,
    /// Destinations admitted to the graph for the first time
    pub discovered: usize,
    /// References dropped (unclassifiable, unresolvable or excluded)
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelReport {
    pub channel: ChannelId,
    pub outcome: ChannelOutcome,
    pub stats: ScanStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub scanned: usize,
    pub excluded: usize,
    pub vanished: usize,
    pub retained: usize,
    pub items: usize,
    pub references: usize,
    pub discovered: usize,
}

impl CrawlSummary {
    pub fn absorb(&mut self, report: &ChannelReport) {
        match report.outcome {
            ChannelOutcome::Scanned => self.scanned += 1,
            ChannelOutcome::Excluded => self.excluded += 1,
            ChannelOutcome::Vanished => self.vanished += 1,
            ChannelOutcome::Retained { .. } => self.retained += 1,
        }
        self.items += report.stats.items;
        self.references += report.stats.references;
        self.discovered += report.stats.discovered;
    }

    pub fn merge(&mut self, other: &CrawlSummary) {
        self.scanned += other.scanned;
        self.excluded += other.excluded;
        self.vanished += other.vanished;
        self.retained += other.retained;
        self.items += other.items;
        self.references += other.references;
        self.discovered += other.discovered;
    }

    pub fn channels(&self) -> usize {
        self.scanned + self.excluded + self.vanished + self.retained
    }
}

/// What a single driver step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Processed(ChannelReport),
    /// Every pending entry is claimed by another local worker
    Waiting,
    Drained,
}

// ============================================================================
// CLAIMS
// ============================================================================

type ClaimSet = Arc<Mutex<HashSet<ChannelId>>>;

/// Marks a channel as in flight for this process until dropped.
struct ClaimGuard {
    claims: ClaimSet,
    channel: ChannelId,
}

impl ClaimGuard {
    fn acquire(claims: &ClaimSet, channel: ChannelId) -> Option<Self> {
        let inserted = claims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(channel);

        inserted.then(|| Self {
            claims: Arc::clone(claims),
            channel,
        })
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.claims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.channel);
    }
}

fn claimed(claims: &ClaimSet) -> HashSet<ChannelId> {
    claims.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

enum Claim {
    Acquired(ClaimGuard),
    Busy,
    Drained,
}

// ============================================================================
// DRIVER
// ============================================================================

pub struct CrawlDriver<S: ?Sized, C: ?Sized> {
    source: Arc<C>,
    frontier: Frontier<S>,
    registry: VisitedRegistry<S>,
    aggregator: EdgeAggregator<S>,
    config: CrawlConfig,
    claims: ClaimSet,
    /// Entries that failed during the current run; skipped until it ends
    deferred: ClaimSet,
}

impl<S, C> CrawlDriver<S, C>
where
    S: GraphStore + ?Sized,
    C: ContentSource + ?Sized,
{
    pub fn new(store: Arc<S>, source: Arc<C>, config: CrawlConfig) -> Self {
        Self {
            source,
            frontier: Frontier::new(Arc::clone(&store)),
            registry: VisitedRegistry::new(Arc::clone(&store)),
            aggregator: EdgeAggregator::new(store, config.split_instant),
            config,
            claims: Arc::new(Mutex::new(HashSet::new())),
            deferred: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn frontier(&self) -> &Frontier<S> {
        &self.frontier
    }

    /// Resolve the seed and put it on the frontier.
    ///
    /// A no-op if the seed is already a node, so re-running after a restart
    /// does not re-scan it.
    pub async fn seed(&self, locator: &Locator) -> CrawlResult<ChannelId> {
        let metadata = self.source.resolve(locator).await?;
        let enqueued = self.frontier.enqueue(metadata.id).await?;

        tracing::info!(
            seed = %locator,
            channel_id = %metadata.id,
            title = %metadata.title,
            enqueued,
            "Seed registered"
        );

        Ok(metadata.id)
    }

    /// Process every pending channel with the configured number of workers
    /// and return once the frontier is empty. Entries that fail are tried
    /// once per run and left on the frontier. A failing step (the store not
    /// answering a frontier peek, say) is retried with a growing pause; only
    /// a run of consecutive failures ends the crawl with an error.
    pub async fn run_until_drained(&self) -> CrawlResult<CrawlSummary> {
        self.run_workers(None).await
    }

    /// Keep crawling until `cancel` fires, polling an empty frontier every
    /// `poll_interval`. A scan interrupted by cancellation keeps its entry.
    pub async fn run(&self, cancel: CancellationToken) -> CrawlResult<CrawlSummary> {
        self.run_workers(Some(cancel)).await
    }

    async fn run_workers(&self, cancel: Option<CancellationToken>) -> CrawlResult<CrawlSummary> {
        self.clear_deferred();

        let workers = (0..self.config.workers).map(|worker| {
            self.worker_loop(cancel.clone())
                .instrument(tracing::info_span!("crawl_worker", worker))
        });

        let results = join_all(workers).await;
        self.clear_deferred();

        let mut summary = CrawlSummary::default();
        for result in results {
            summary.merge(&result?);
        }

        tracing::info!(
            channels = summary.channels(),
            scanned = summary.scanned,
            excluded = summary.excluded,
            vanished = summary.vanished,
            retained = summary.retained,
            references = summary.references,
            discovered = summary.discovered,
            "Crawl finished"
        );

        Ok(summary)
    }

    async fn worker_loop(&self, cancel: Option<CancellationToken>) -> CrawlResult<CrawlSummary> {
        let mut summary = CrawlSummary::default();
        let mut failures = 0;

        loop {
            let step = match &cancel {
                None => match self.process_next().await {
                    Ok(step) => step,
                    Err(e) => {
                        failures += 1;
                        if failures >= MAX_CONSECUTIVE_FAILURES {
                            tracing::error!(
                                error = %e,
                                failures,
                                "Crawl step keeps failing, worker stopping"
                            );
                            return Err(e);
                        }
                        tracing::warn!(error = %e, failures, "Crawl step failed, backing off");
                        tokio::time::sleep(IN_FLIGHT_WAIT * failures).await;
                        continue;
                    }
                },
                Some(token) => {
                    let result = tokio::select! {
                        _ = token.cancelled() => break,
                        result = self.process_next() => result,
                    };
                    match result {
                        Ok(step) => step,
                        Err(e) => {
                            tracing::warn!(error = %e, "Crawl step failed, backing off");
                            if self.pause(token, self.config.poll_interval).await {
                                break;
                            }
                            continue;
                        }
                    }
                }
            };

            failures = 0;

            match step {
                Step::Processed(report) => {
                    if !report.outcome.is_success() {
                        self.deferred
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(report.channel);
                    }
                    summary.absorb(&report);
                }
                Step::Waiting => match &cancel {
                    Some(token) => {
                        if self.pause(token, IN_FLIGHT_WAIT).await {
                            break;
                        }
                    }
                    None => tokio::time::sleep(IN_FLIGHT_WAIT).await,
                },
                Step::Drained => match &cancel {
                    Some(token) => {
                        if self.pause(token, self.config.poll_interval).await {
                            break;
                        }
                        // Give failed entries another chance after each idle period
                        self.clear_deferred();
                    }
                    None => break,
                },
            }
        }

        Ok(summary)
    }

    fn clear_deferred(&self) {
        self.deferred
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Sleep for `wait`; returns true if cancelled first.
    async fn pause(&self, token: &CancellationToken, wait: Duration) -> bool {
        tokio::select! {
            _ = token.cancelled() => true,
            _ = tokio::time::sleep(wait) => false,
        }
    }

    /// Run one channel through the state machine.
    pub async fn process_next(&self) -> CrawlResult<Step> {
        let mut state = DriverState::Idle;
        let mut stats = ScanStats::default();
        let mut claim = None;

        loop {
            tracing::trace!(state = ?state, "Driver transition");

            state = match state {
                DriverState::Idle => match self.claim_next().await? {
                    Claim::Acquired(guard) => {
                        let channel = guard.channel;
                        claim = Some(guard);
                        DriverState::Resolving { channel }
                    }
                    Claim::Busy => return Ok(Step::Waiting),
                    Claim::Drained => DriverState::Draining,
                },

                DriverState::Resolving { channel } => self.resolve_frontier_channel(channel).await,

                DriverState::Scanning { channel } => {
                    let outcome = match self.scan(&channel, &mut stats).await {
                        Ok(()) => ChannelOutcome::Scanned,
                        Err(e) => ChannelOutcome::Retained {
                            reason: e.to_string(),
                        },
                    };
                    DriverState::Completing {
                        channel: channel.id,
                        outcome,
                    }
                }

                DriverState::Completing { channel, outcome } => {
                    let outcome = self.complete(channel, outcome, &stats).await;
                    drop(claim.take());
                    return Ok(Step::Processed(ChannelReport {
                        channel,
                        outcome,
                        stats,
                    }));
                }

                DriverState::Draining => {
                    tracing::debug!("Frontier drained");
                    return Ok(Step::Drained);
                }
            };
        }
    }

    async fn claim_next(&self) -> CrawlResult<Claim> {
        loop {
            let in_flight = claimed(&self.claims);
            let mut skipped = claimed(&self.deferred);
            skipped.extend(in_flight.iter().copied());

            match self.frontier.take_next_excluding(&skipped).await {
                Ok(channel) => {
                    if let Some(guard) = ClaimGuard::acquire(&self.claims, channel) {
                        return Ok(Claim::Acquired(guard));
                    }
                    // A peer claimed it between snapshot and acquire
                }
                Err(FrontierError::Empty) if in_flight.is_empty() => return Ok(Claim::Drained),
                Err(FrontierError::Empty) => return Ok(Claim::Busy),
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn resolve_frontier_channel(&self, channel: ChannelId) -> DriverState {
        match self.source.resolve(&Locator::Id(channel)).await {
            Ok(metadata) if metadata.excluded && self.config.exclude_groups => {
                tracing::info!(channel_id = %channel, title = %metadata.title, "Skipping group channel");
                DriverState::Completing {
                    channel,
                    outcome: ChannelOutcome::Excluded,
                }
            }
            Ok(metadata) => DriverState::Scanning { channel: metadata },
            Err(SourceError::NotFound { .. }) => {
                tracing::warn!(channel_id = %channel, "Channel no longer resolves, dropping it");
                DriverState::Completing {
                    channel,
                    outcome: ChannelOutcome::Vanished,
                }
            }
            Err(e) => DriverState::Completing {
                channel,
                outcome: ChannelOutcome::Retained {
                    reason: e.to_string(),
                },
            },
        }
    }

    async fn scan(&self, channel: &ChannelMetadata, stats: &mut ScanStats) -> CrawlResult<()> {
        self.registry.refresh(channel).await?;

        // Per-scan resolution cache; `None` marks a dropped destination
        let mut resolved: HashMap<Locator, Option<ChannelId>> = HashMap::new();
        let mut items = self.source.stream_items(channel.id);

        while let Some(item) = items.next().await {
            let item = item?;
            stats.items += 1;

            for (locator, kind) in classified_references(&item) {
                let Some(destination) = self.follow_reference(&locator, &mut resolved, stats).await?
                else {
                    stats.dropped += 1;
                    continue;
                };

                self.aggregator
                    .record_reference(channel.id, destination, item.date, kind)
                    .await?;
                stats.references += 1;
            }
        }

        Ok(())
    }

    /// Resolve a reference destination and admit it to the graph.
    ///
    /// `Ok(None)` drops the reference. Transient source failures abort the
    /// scan so that no reference is silently lost.
    async fn follow_reference(
        &self,
        locator: &Locator,
        resolved: &mut HashMap<Locator, Option<ChannelId>>,
        stats: &mut ScanStats,
    ) -> CrawlResult<Option<ChannelId>> {
        if let Some(cached) = resolved.get(locator) {
            return Ok(*cached);
        }

        let destination = match self.source.resolve(locator).await {
            Ok(metadata) if metadata.excluded && self.config.exclude_groups => {
                tracing::debug!(locator = %locator, channel_id = %metadata.id, "Dropping reference to group channel");
                None
            }
            Ok(metadata) => {
                if self.registry.admit(&metadata).await? == Admission::Discovered {
                    stats.discovered += 1;
                }
                resolved.insert(Locator::Id(metadata.id), Some(metadata.id));
                Some(metadata.id)
            }
            Err(e) if e.is_transient() => return Err(CrawlError::Source(e)),
            Err(e) => {
                tracing::debug!(locator = %locator, error = %e, "Dropping unresolvable reference");
                None
            }
        };

        resolved.insert(locator.clone(), destination);
        Ok(destination)
    }

    async fn complete(
        &self,
        channel: ChannelId,
        outcome: ChannelOutcome,
        stats: &ScanStats,
    ) -> ChannelOutcome {
        if let ChannelOutcome::Retained { reason } = &outcome {
            tracing::warn!(channel_id = %channel, reason = %reason, items = stats.items, "Channel retained for retry");
            return outcome;
        }

        if let Err(e) = self.frontier.complete(channel).await {
            tracing::warn!(channel_id = %channel, error = %e, "Failed to complete frontier entry");
            return ChannelOutcome::Retained {
                reason: e.to_string(),
            };
        }

        tracing::info!(
            channel_id = %channel,
            outcome = ?outcome,
            items = stats.items,
            references = stats.references,
            discovered = stats.discovered,
            dropped = stats.dropped,
            "Channel completed"
        );

        outcome
    }
}
