//! Typed errors for the channel crawler.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell a
//! missing channel apart from an unreachable content source.

use thiserror::Error;

/// Errors raised by graph store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity does not exist
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Entity already exists (strict create)
    #[error("{entity} already exists: {key}")]
    Conflict { entity: &'static str, key: String },

    /// A concurrent-update conflict kept recurring after internal retries
    #[error("contention on {key} persisted after {attempts} attempts")]
    Contention { key: String, attempts: u32 },

    /// Stored data could not be mapped back into a domain value
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// In-memory state was poisoned by a panicking writer
    #[error("store state poisoned")]
    Poisoned,

    /// Database failure
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, key: impl ToString) -> Self {
        Self::Conflict {
            entity,
            key: key.to_string(),
        }
    }
}

/// Errors raised by a content source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The locator does not resolve to any entity
    #[error("channel not found: {locator}")]
    NotFound { locator: String },

    /// The source could not be reached or failed mid-operation
    #[error("content source unavailable: {0}")]
    Unavailable(String),

    /// HTTP transport failure
    #[error("content source request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The source answered with something we cannot interpret
    #[error("unexpected content source response: {0}")]
    Protocol(String),
}

impl SourceError {
    /// Whether the failure is about the source itself rather than the
    /// thing being looked up. Transient failures must not be mistaken for
    /// "this reference points nowhere".
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Http(_))
    }
}

/// Errors from frontier operations.
#[derive(Debug, Error)]
pub enum FrontierError {
    /// No entries remain (steady-state signal, not a failure)
    #[error("frontier is empty")]
    Empty,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors surfaced by the crawl driver.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("frontier error: {0}")]
    Frontier(#[from] FrontierError),

    /// Invalid crawl configuration
    #[error("config error: {0}")]
    Config(String),
}

/// Failure to parse one of the crate's textual enums.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for content source operations.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Result type alias for crawl operations.
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;
