//! Crawl worker
//!
//! Seeds the frontier (from `--seed` or `SEED_CHANNEL`) and scans channels
//! until the frontier drains (`--drain`) or the process is interrupted.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use channel_crawler::{parse_locator, CrawlDriver, GraphCatalog, HttpContentSource};
use clap::Parser;
use graph_server::{connect_store, telemetry, Config};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "crawler")]
#[command(about = "Breadth-first crawl of the channel reference graph")]
struct Cli {
    /// Channel to start from (@name, t.me link or numeric id)
    #[arg(long, env = "SEED_CHANNEL")]
    seed: Option<String>,

    /// Concurrent scan workers (overrides CRAWL_WORKERS)
    #[arg(long)]
    workers: Option<usize>,

    /// Exit once the frontier is empty instead of polling for new entries
    #[arg(long)]
    drain: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    let Some(source_url) = config.content_source_url.as_deref() else {
        bail!("CONTENT_SOURCE_URL must be set to run the crawler");
    };
    let mut source = HttpContentSource::new(source_url);
    if let Some(token) = &config.content_source_token {
        source = source.with_token(token.clone());
    }

    let mut crawl_config = config.crawl_config();
    if let Some(workers) = cli.workers {
        crawl_config = crawl_config.with_workers(workers);
    }

    let handle = connect_store(&config).await?;
    let driver: CrawlDriver<dyn GraphCatalog, HttpContentSource> =
        CrawlDriver::new(handle.store, Arc::new(source), crawl_config);

    let seed = cli.seed.or_else(|| config.seed_channel.clone());
    if let Some(raw) = seed {
        let locator = parse_locator(&raw)
            .with_context(|| format!("Seed {:?} is not a channel locator", raw))?;
        driver
            .seed(&locator)
            .await
            .with_context(|| format!("Failed to seed {}", locator))?;
    }

    tracing::info!(
        workers = driver.config().workers,
        drain = cli.drain,
        source = %source_url,
        "Crawler starting"
    );

    let summary = if cli.drain {
        driver.run_until_drained().await?
    } else {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!(
                        "Interrupt received, abandoning in-flight scans (their entries stay queued for retry)"
                    );
                    on_signal.cancel();
                }
                Err(e) => tracing::error!(error = %e, "Failed to listen for interrupt"),
            }
        });
        driver.run(cancel).await?
    };

    tracing::info!(
        scanned = summary.scanned,
        excluded = summary.excluded,
        vanished = summary.vanished,
        retained = summary.retained,
        items = summary.items,
        references = summary.references,
        discovered = summary.discovered,
        "Crawler finished"
    );

    Ok(())
}
