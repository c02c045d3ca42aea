//! End-to-end crawl tests against the in-memory store and mock source.
//!
//! These cover the full driver loop:
//! 1. Seed resolution and enqueue
//! 2. Reference extraction, resolution and admission
//! 3. Edge aggregation
//! 4. Frontier completion and retention on failure

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;

use channel_crawler::testing::MockContentSource;
use channel_crawler::{
    default_split_instant, ChannelId, ChannelOutcome, ContentItem, CrawlConfig, CrawlDriver,
    EdgeKey, EntityKind, ForwardOrigin, GraphStore, Locator, MemoryGraphStore, MessageEntity,
    ReferenceKind, Step, TimeBucket,
};

type TestDriver = CrawlDriver<MemoryGraphStore, MockContentSource>;

fn setup(source: &MockContentSource, config: CrawlConfig) -> (Arc<MemoryGraphStore>, TestDriver) {
    let store = Arc::new(MemoryGraphStore::new());
    let driver = CrawlDriver::new(store.clone(), Arc::new(source.clone()), config);
    (store, driver)
}

fn after_split() -> chrono::DateTime<Utc> {
    default_split_instant() + Duration::days(30)
}

/// Message whose whole text is one mention entity.
fn mention(id: i64, username: &str) -> ContentItem {
    let text = format!("@{}", username);
    let length = text.encode_utf16().count();
    ContentItem::new(id, after_split(), text).with_entity(MessageEntity::new(
        EntityKind::Mention,
        0,
        length,
    ))
}

fn forward(id: i64, from: i64) -> ContentItem {
    ContentItem::new(id, after_split(), "").forwarded_from(ForwardOrigin::Channel {
        channel_id: ChannelId(from),
    })
}

/// C1 holds a forward from C2 and a mention of @c3.
fn three_channel_source() -> MockContentSource {
    MockContentSource::new()
        .with_channel(MockContentSource::channel(1, "Channel One", Some("c1")))
        .with_channel(MockContentSource::channel(2, "Channel Two", Some("c2")))
        .with_channel(MockContentSource::channel(3, "Channel Three", Some("c3")))
        .with_item(ChannelId(1), forward(1, 2))
        .with_item(ChannelId(1), mention(2, "c3"))
}

#[tokio::test]
async fn test_seed_scan_discovers_forward_and_mention() {
    let source = three_channel_source();
    let (store, driver) = setup(&source, CrawlConfig::default());

    let seed = driver.seed(&Locator::username("c1")).await.unwrap();
    assert_eq!(seed, ChannelId(1));

    let Step::Processed(report) = driver.process_next().await.unwrap() else {
        panic!("expected the seed to be processed");
    };
    assert_eq!(report.channel, ChannelId(1));
    assert_eq!(report.outcome, ChannelOutcome::Scanned);
    assert_eq!(report.stats.items, 2);
    assert_eq!(report.stats.references, 2);
    assert_eq!(report.stats.discovered, 2);

    let node_ids: Vec<_> = store.nodes().unwrap().into_iter().map(|n| n.id).collect();
    assert_eq!(node_ids, vec![ChannelId(1), ChannelId(2), ChannelId(3)]);

    let edges = store.edges().unwrap();
    assert_eq!(edges.len(), 2);

    let to_c2 = &edges[0];
    assert_eq!(to_c2.key(), EdgeKey::new(ChannelId(1), ChannelId(2), TimeBucket::After));
    assert_eq!(to_c2.kind, ReferenceKind::Forward);
    assert_eq!(to_c2.strength, 1);

    let to_c3 = &edges[1];
    assert_eq!(to_c3.key(), EdgeKey::new(ChannelId(1), ChannelId(3), TimeBucket::After));
    assert_eq!(to_c3.kind, ReferenceKind::LinkOrMention);
    assert_eq!(to_c3.strength, 1);

    assert_eq!(store.frontier_ids().unwrap(), vec![ChannelId(2), ChannelId(3)]);
}

#[tokio::test]
async fn test_crawl_drains_whole_component() {
    let source = three_channel_source()
        .with_item(ChannelId(2), mention(1, "c1"))
        .with_item(ChannelId(3), forward(1, 2));
    let (store, driver) = setup(&source, CrawlConfig::default());

    driver.seed(&Locator::username("c1")).await.unwrap();
    let summary = driver.run_until_drained().await.unwrap();

    assert_eq!(summary.scanned, 3);
    assert_eq!(summary.references, 4);
    assert_eq!(summary.discovered, 2);
    assert!(store.frontier_ids().unwrap().is_empty());
    assert_eq!(store.edges().unwrap().len(), 4);

    // Each channel's stream is read exactly once
    let mut streamed = source.stream_calls();
    streamed.sort();
    assert_eq!(streamed, vec![ChannelId(1), ChannelId(2), ChannelId(3)]);
}

#[tokio::test]
async fn test_group_channel_is_excluded_without_trace() {
    let source = MockContentSource::new()
        .with_channel(MockContentSource::group(5, "Chat", Some("chat")))
        .with_item(ChannelId(5), forward(1, 6));
    let (store, driver) = setup(&source, CrawlConfig::default());

    driver.seed(&Locator::username("chat")).await.unwrap();
    assert_eq!(store.frontier_ids().unwrap(), vec![ChannelId(5)]);

    let summary = driver.run_until_drained().await.unwrap();

    assert_eq!(summary.excluded, 1);
    assert!(store.nodes().unwrap().is_empty());
    assert!(store.edges().unwrap().is_empty());
    assert!(store.frontier_ids().unwrap().is_empty());
    assert!(source.stream_calls().is_empty());
}

#[tokio::test]
async fn test_group_channel_scanned_when_exclusion_disabled() {
    let source = MockContentSource::new()
        .with_channel(MockContentSource::group(5, "Chat", Some("chat")))
        .with_channel(MockContentSource::channel(6, "Feed", None))
        .with_item(ChannelId(5), forward(1, 6));
    let (store, driver) = setup(&source, CrawlConfig::new().with_exclude_groups(false));

    driver.seed(&Locator::Id(ChannelId(5))).await.unwrap();
    driver.run_until_drained().await.unwrap();

    assert_eq!(store.nodes().unwrap().len(), 2);
    assert_eq!(store.edges().unwrap().len(), 1);
}

#[tokio::test]
async fn test_references_to_groups_are_dropped() {
    let source = MockContentSource::new()
        .with_channel(MockContentSource::channel(1, "Feed", Some("feed")))
        .with_channel(MockContentSource::group(2, "Chat", Some("chat")))
        .with_item(ChannelId(1), mention(1, "chat"));
    let (store, driver) = setup(&source, CrawlConfig::default());

    driver.seed(&Locator::username("feed")).await.unwrap();
    let summary = driver.run_until_drained().await.unwrap();

    assert_eq!(summary.references, 0);
    assert_eq!(store.nodes().unwrap().len(), 1);
    assert!(store.edges().unwrap().is_empty());
}

#[tokio::test]
async fn test_mid_stream_failure_keeps_entry_unchanged() {
    let source = three_channel_source().with_stream_failure(ChannelId(1), 1);
    let (store, driver) = setup(&source, CrawlConfig::default());

    driver.seed(&Locator::username("c1")).await.unwrap();
    let before = store.peek_frontier(10).await.unwrap();

    let Step::Processed(report) = driver.process_next().await.unwrap() else {
        panic!("expected the seed to be processed");
    };
    assert!(matches!(report.outcome, ChannelOutcome::Retained { .. }));
    assert_eq!(report.stats.items, 1);

    let after = store.peek_frontier(10).await.unwrap();
    assert_eq!(after[0], before[0]);
    assert!(after.iter().any(|e| e.channel_id == ChannelId(1)));
}

#[tokio::test]
async fn test_retained_channel_is_retried_and_replayed() {
    let source = three_channel_source().with_stream_failure(ChannelId(1), 1);
    let (store, driver) = setup(&source, CrawlConfig::default());

    driver.seed(&Locator::username("c1")).await.unwrap();
    driver.process_next().await.unwrap();

    source.set_stream_failure(ChannelId(1), None);
    let Step::Processed(report) = driver.process_next().await.unwrap() else {
        panic!("expected the seed to be processed again");
    };
    assert_eq!(report.channel, ChannelId(1));
    assert_eq!(report.outcome, ChannelOutcome::Scanned);

    // The forward seen before the failure is counted again on replay
    let forward_edge = store
        .get_edge(&EdgeKey::new(ChannelId(1), ChannelId(2), TimeBucket::After))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(forward_edge.strength, 2);
    assert!(!store.frontier_ids().unwrap().contains(&ChannelId(1)));
}

#[tokio::test]
async fn test_unavailable_frontier_channel_is_retained() {
    let source = three_channel_source().with_unavailable(Locator::Id(ChannelId(1)));
    let (store, driver) = setup(&source, CrawlConfig::default());

    driver.seed(&Locator::username("c1")).await.unwrap();
    let summary = driver.run_until_drained().await.unwrap();

    assert_eq!(summary.retained, 1);
    assert_eq!(store.frontier_ids().unwrap(), vec![ChannelId(1)]);
    assert!(source.stream_calls().is_empty());

    // A later run tries it again
    source.set_unavailable(Locator::Id(ChannelId(1)), false);
    let summary = driver.run_until_drained().await.unwrap();
    assert_eq!(summary.scanned, 3);
    assert!(store.frontier_ids().unwrap().is_empty());
}

#[tokio::test]
async fn test_vanished_channel_is_completed() {
    let source = MockContentSource::new();
    let (store, driver) = setup(&source, CrawlConfig::default());
    driver.frontier().enqueue(ChannelId(404)).await.unwrap();

    let Step::Processed(report) = driver.process_next().await.unwrap() else {
        panic!("expected the entry to be processed");
    };

    assert_eq!(report.outcome, ChannelOutcome::Vanished);
    assert!(store.frontier_ids().unwrap().is_empty());
    assert!(store.nodes().unwrap().is_empty());
}

#[tokio::test]
async fn test_reseed_after_crawl_is_noop() {
    let source = three_channel_source();
    let (store, driver) = setup(&source, CrawlConfig::default());

    driver.seed(&Locator::username("c1")).await.unwrap();
    driver.run_until_drained().await.unwrap();
    let edges_before = store.edges().unwrap();

    driver.seed(&Locator::username("c1")).await.unwrap();
    assert!(store.frontier_ids().unwrap().is_empty());

    let summary = driver.run_until_drained().await.unwrap();
    assert_eq!(summary.channels(), 0);
    assert_eq!(store.edges().unwrap(), edges_before);
}

#[tokio::test]
async fn test_references_are_bucketed_by_message_date() {
    let split = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let old = ContentItem::new(1, split - Duration::seconds(1), "").forwarded_from(
        ForwardOrigin::Channel {
            channel_id: ChannelId(2),
        },
    );
    let new = ContentItem::new(2, split, "").forwarded_from(ForwardOrigin::Channel {
        channel_id: ChannelId(2),
    });
    let source = MockContentSource::new()
        .with_channel(MockContentSource::channel(1, "One", None))
        .with_channel(MockContentSource::channel(2, "Two", None))
        .with_items(ChannelId(1), vec![old, new]);
    let (store, driver) = setup(&source, CrawlConfig::new().with_split_instant(split));

    driver.seed(&Locator::Id(ChannelId(1))).await.unwrap();
    driver.process_next().await.unwrap();

    let buckets: Vec<_> = store.edges().unwrap().into_iter().map(|e| e.bucket).collect();
    assert_eq!(buckets, vec![TimeBucket::Before, TimeBucket::After]);
}

#[tokio::test]
async fn test_link_forms_resolve_to_same_destination() {
    let text = "https://t.me/c2 t.me/s/c2 https://t.me/joinchat/AAAA";
    let item = ContentItem::new(1, after_split(), text)
        .with_entity(MessageEntity::new(EntityKind::Url, 0, 15))
        .with_entity(MessageEntity::new(EntityKind::Url, 16, 9))
        .with_entity(MessageEntity::new(EntityKind::Url, 26, 26))
        .with_entity(MessageEntity::new(
            EntityKind::TextUrl {
                url: "https://telegram.me/C2".to_string(),
            },
            0,
            4,
        ));
    let source = MockContentSource::new()
        .with_channel(MockContentSource::channel(1, "One", Some("c1")))
        .with_channel(MockContentSource::channel(2, "Two", Some("c2")))
        .with_item(ChannelId(1), item);
    let (store, driver) = setup(&source, CrawlConfig::default());

    driver.seed(&Locator::username("c1")).await.unwrap();
    driver.process_next().await.unwrap();

    let edges = store.edges().unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].destination, ChannelId(2));
    assert_eq!(edges[0].strength, 3);
}

#[tokio::test]
async fn test_concurrent_workers_scan_each_channel_once() {
    // Channel 1 mentions 2..=8; every other channel mentions 1 and its successor
    let mut source = MockContentSource::new();
    for id in 1..=8 {
        source = source.with_channel(MockContentSource::channel(
            id,
            &format!("Channel {}", id),
            Some(&format!("c{}", id)),
        ));
    }
    for (n, id) in (2..=8).enumerate() {
        source = source.with_item(ChannelId(1), mention(n as i64 + 1, &format!("c{}", id)));
    }
    for id in 2..=8 {
        let next = if id == 8 { 2 } else { id + 1 };
        source = source
            .with_item(ChannelId(id), mention(1, "c1"))
            .with_item(ChannelId(id), mention(2, &format!("c{}", next)));
    }

    let (store, driver) = setup(&source, CrawlConfig::new().with_workers(4));
    driver.seed(&Locator::username("c1")).await.unwrap();
    let summary = driver.run_until_drained().await.unwrap();

    assert_eq!(summary.scanned, 8);
    assert_eq!(summary.discovered, 7);
    assert!(store.frontier_ids().unwrap().is_empty());

    let mut streamed = source.stream_calls();
    streamed.sort();
    assert_eq!(streamed, (1..=8).map(ChannelId).collect::<Vec<_>>());

    let edges = store.edges().unwrap();
    assert_eq!(edges.len(), 7 + 14);
    assert!(edges.iter().all(|e| e.strength == 1));
}
