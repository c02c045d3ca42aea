//! Channel link-graph discovery engine.
//!
//! Starting from a seed channel, the crawler follows forwards, mentions and
//! `t.me` links to other channels. Every channel it meets becomes a node;
//! every reference increments a time-bucketed, weighted edge between the
//! channel it was found in and the channel it points to.
//!
//! # Example
//!
//! ```rust,ignore
//! use channel_crawler::{CrawlConfig, CrawlDriver, HttpContentSource, Locator, MemoryGraphStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryGraphStore::new());
//! let source = Arc::new(HttpContentSource::new("http://localhost:9000"));
//! let driver = CrawlDriver::new(store, source, CrawlConfig::default());
//!
//! driver.seed(&Locator::username("durov")).await?;
//! let summary = driver.run_until_drained().await?;
//! println!("{} channels scanned", summary.scanned);
//! ```
//!
//! # Modules
//!
//! - [`classifier`] - Raw reference → channel locator
//! - [`extractor`] - Outbound references of one message
//! - [`frontier`] - Pending channels, breadth-first
//! - [`registry`] - Visited set and node admission
//! - [`aggregator`] - Edge strength and kind bookkeeping
//! - [`driver`] - The crawl loop
//! - [`storage`] - In-memory and PostgreSQL graph stores
//! - [`sources`] - HTTP content source
//! - [`testing`] - Mock content source

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod driver;
pub mod error;
pub mod extractor;
pub mod frontier;
pub mod registry;
pub mod sources;
pub mod storage;
pub mod testing;
pub mod traits;
pub mod types;

pub use aggregator::EdgeAggregator;
pub use classifier::{classify, classify_text, parse_locator, RawReference};
pub use config::{default_split_instant, CrawlConfig};
pub use driver::{ChannelOutcome, ChannelReport, CrawlDriver, CrawlSummary, DriverState, ScanStats, Step};
pub use error::{CrawlError, CrawlResult, FrontierError, ParseError, SourceError, StoreError, StoreResult};
pub use extractor::{classified_references, extract_references};
pub use frontier::Frontier;
pub use registry::VisitedRegistry;
pub use sources::HttpContentSource;
pub use storage::MemoryGraphStore;
#[cfg(feature = "postgres")]
pub use storage::PostgresGraphStore;
pub use traits::{ContentSource, GraphCatalog, GraphStore, ItemStream};
pub use types::*;
