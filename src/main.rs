//! # Trend Harvester
//!
//! The ingestion front of a trend-driven news pipeline. It discovers trending
//! search keywords, keeps the ones not covered recently, finds news articles
//! for each and harvests their clean text for downstream summarization.
//!
//! ## Usage
//!
//! ```sh
//! trend_harvester --mode daily -j ./bundles
//! trend_harvester --schedule -c ./config.yaml -j ./bundles
//! ```
//!
//! ## Architecture
//!
//! 1. **Discovery**: trending keywords from the Google Trends RSS feed
//! 2. **Deduplication**: recency lookup, then an LLM similarity check (sequential)
//! 3. **Search**: top news URLs per accepted keyword
//! 4. **Harvest**: concurrent fetch, validation and text extraction with retries
//! 5. **Delivery**: one JSON bundle per keyword, written through a bounded pool

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod config;
mod dedup;
mod harvest;
mod models;
mod outputs;
mod pipeline;
mod pool;
mod scheduler;
mod sources;
mod utils;

use api::LlmSimilarityOracle;
use cli::Cli;
use config::{AppConfig, ConfigError};
use dedup::DedupFilter;
use harvest::Harvester;
use harvest::fetch::HttpFetcher;
use models::Mode;
use outputs::archive::JsonArchive;
use pipeline::Pipeline;
use scheduler::Scheduler;
use sources::search::GoogleCustomSearch;
use sources::trends::GoogleTrendsFeed;
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // Secrets may live in a local .env; real environment variables win.
    let dotenv = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("trend_harvester starting up");
    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) if e.not_found() => debug!("No .env file found"),
        Err(e) => error!(error = %e, "Failed to read .env"),
    }

    let args = Cli::parse();
    debug!(?args.mode, args.schedule, ?args.config, %args.json_output_dir, "Parsed CLI arguments");

    let config = AppConfig::load(args.config.as_deref())?;

    if let Err(e) = ensure_writable_dir(&args.json_output_dir).await {
        error!(
            path = %args.json_output_dir,
            error = %e,
            "JSON output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let pipeline = Arc::new(build_pipeline(&args, &config)?);

    if args.schedule {
        let handle = Scheduler::new(pipeline, &config.schedule)?.start();
        info!("Scheduler running; press Ctrl-C to stop");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C; stopping");
        }
        handle.stop().await;
    } else {
        let mode = args.mode.unwrap_or(Mode::Daily);
        match pipeline.run(mode).await {
            Ok(summary) => info!(
                %mode,
                accepted = ?summary.accepted,
                articles = summary.articles,
                delivered = summary.delivered,
                "Run succeeded"
            ),
            Err(e) => {
                error!(%mode, error = %e, "Run failed");
                return Err(e.into());
            }
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

/// Wire every collaborator into a [`Pipeline`].
///
/// Missing secrets are the only fatal configuration problem.
fn build_pipeline(args: &Cli, config: &AppConfig) -> Result<Pipeline, Box<dyn Error>> {
    let google_api_key = require(&args.google_api_key, "GOOGLE_API_KEY")?;
    let engine_id = require(&args.google_search_engine_id, "GOOGLE_SEARCH_ENGINE_ID")?;
    let oracle_api_key = require(&args.oracle_api_key, "ORACLE_API_KEY")?;

    let archive = Arc::new(JsonArchive::new(PathBuf::from(&args.json_output_dir)));
    let oracle = Arc::new(LlmSimilarityOracle::new(&config.oracle, oracle_api_key)?);
    let dedup = DedupFilter::new(
        archive.clone(),
        oracle,
        config.dedup.window_hours,
        config.dedup.max_daily_topics,
    );

    let fetcher = Arc::new(HttpFetcher::new(&config.harvest)?);
    let harvester = Harvester::new(fetcher, config.harvest.clone());

    let trends = Arc::new(GoogleTrendsFeed::new(config.trends.clone())?);
    let search = Arc::new(GoogleCustomSearch::new(
        config.search.clone(),
        google_api_key,
        engine_id,
    )?);

    info!(
        json_output_dir = %archive.root().display(),
        window_hours = config.dedup.window_hours,
        harvest_concurrency = config.harvest.max_concurrent,
        downstream_concurrency = config.downstream.max_concurrent,
        "Pipeline assembled"
    );
    Ok(Pipeline::new(trends, search, dedup, harvester, archive, config))
}

fn require(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::MissingSecret(name))
}
