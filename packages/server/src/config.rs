use anyhow::{bail, Context, Result};
use channel_crawler::{default_split_instant, CrawlConfig};
use chrono::{DateTime, Utc};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which graph store backs the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Postgres,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            other => bail!("unknown graph store {:?} (expected memory or postgres)", other),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub graph_store: StoreKind,
    pub database_url: Option<String>,
    pub content_source_url: Option<String>,
    pub content_source_token: Option<String>,
    pub seed_channel: Option<String>,
    pub split_instant: DateTime<Utc>,
    pub exclude_groups: bool,
    pub crawl_workers: usize,
    pub poll_interval: Duration,
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let graph_store = match var("GRAPH_STORE") {
            Some(raw) => raw.parse().context("GRAPH_STORE must be memory or postgres")?,
            None => StoreKind::Postgres,
        };

        let database_url = var("DATABASE_URL");
        if graph_store == StoreKind::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set when GRAPH_STORE=postgres");
        }

        let split_instant = match var("SPLIT_INSTANT") {
            Some(raw) => DateTime::parse_from_rfc3339(raw.trim())
                .context("SPLIT_INSTANT must be an RFC 3339 timestamp")?
                .with_timezone(&Utc),
            None => default_split_instant(),
        };

        Ok(Self {
            graph_store,
            database_url,
            content_source_url: var("CONTENT_SOURCE_URL"),
            content_source_token: var("CONTENT_SOURCE_TOKEN"),
            seed_channel: var("SEED_CHANNEL"),
            split_instant,
            exclude_groups: match var("EXCLUDE_GROUPS") {
                Some(raw) => parse_bool(&raw).context("EXCLUDE_GROUPS must be true or false")?,
                None => true,
            },
            crawl_workers: var("CRAWL_WORKERS")
                .unwrap_or_else(|| "1".to_string())
                .parse()
                .context("CRAWL_WORKERS must be a valid number")?,
            poll_interval: Duration::from_secs(
                var("POLL_INTERVAL_SECS")
                    .unwrap_or_else(|| "30".to_string())
                    .parse()
                    .context("POLL_INTERVAL_SECS must be a valid number")?,
            ),
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
        })
    }

    /// Crawl driver settings derived from this configuration.
    pub fn crawl_config(&self) -> CrawlConfig {
        CrawlConfig::new()
            .with_split_instant(self.split_instant)
            .with_exclude_groups(self.exclude_groups)
            .with_workers(self.crawl_workers)
            .with_poll_interval(self.poll_interval)
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => bail!("invalid boolean {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/graph")]).unwrap();

        assert_eq!(config.graph_store, StoreKind::Postgres);
        assert_eq!(config.split_instant, default_split_instant());
        assert!(config.exclude_groups);
        assert_eq!(config.crawl_workers, 1);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.port, 8080);
        assert!(config.seed_channel.is_none());
    }

    #[test]
    fn test_postgres_requires_database_url() {
        assert!(config(&[]).is_err());
        assert!(config(&[("GRAPH_STORE", "memory")]).is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("GRAPH_STORE", "Memory"),
            ("SPLIT_INSTANT", "2020-01-01T00:00:00Z"),
            ("EXCLUDE_GROUPS", "no"),
            ("CRAWL_WORKERS", "4"),
            ("POLL_INTERVAL_SECS", "5"),
            ("SEED_CHANNEL", "@news"),
        ])
        .unwrap();

        assert_eq!(config.graph_store, StoreKind::Memory);
        assert_eq!(config.split_instant.to_rfc3339(), "2020-01-01T00:00:00+00:00");
        assert!(!config.exclude_groups);
        assert_eq!(config.seed_channel.as_deref(), Some("@news"));

        let crawl = config.crawl_config();
        assert_eq!(crawl.workers, 4);
        assert_eq!(crawl.poll_interval, Duration::from_secs(5));
        assert!(!crawl.exclude_groups);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(config(&[("GRAPH_STORE", "sqlite")]).is_err());
        assert!(config(&[("GRAPH_STORE", "memory"), ("PORT", "http")]).is_err());
        assert!(config(&[("GRAPH_STORE", "memory"), ("SPLIT_INSTANT", "yesterday")]).is_err());
        assert!(config(&[("GRAPH_STORE", "memory"), ("EXCLUDE_GROUPS", "maybe")]).is_err());
    }
}
