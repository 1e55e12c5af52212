//! Command-line interface definitions for the trend harvester.
//!
//! Secrets are read from the environment (or a `.env` file loaded at
//! startup) so they never appear in shell history.

use clap::{ArgGroup, Parser};

use crate::models::Mode;

/// Command-line arguments for the trend harvester.
///
/// Exactly one of `--mode` (a single run) or `--schedule` (run until Ctrl-C)
/// must be given.
///
/// # Examples
///
/// ```sh
/// # One daily run, then exit
/// trend_harvester --mode daily -j ./bundles
///
/// # Daily run at the configured time plus the recent feed every interval
/// trend_harvester --schedule -c ./config.yaml -j ./bundles
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
#[command(group(ArgGroup::new("run").required(true).args(["mode", "schedule"])))]
pub struct Cli {
    /// Run the pipeline once for this trend feed (daily or recent)
    #[arg(long)]
    pub mode: Option<Mode>,

    /// Keep running: daily at the configured time, recent on an interval
    #[arg(long)]
    pub schedule: bool,

    /// Optional path to config.yaml file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Output directory for harvested keyword bundles
    #[arg(short, long, env = "JSON_OUTPUT_DIR", default_value = "./bundles")]
    pub json_output_dir: String,

    /// Google API key for the Custom Search JSON API
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    /// Programmable Search Engine ID
    #[arg(long, env = "GOOGLE_SEARCH_ENGINE_ID")]
    pub google_search_engine_id: Option<String>,

    /// API key for the similarity oracle's chat endpoint
    #[arg(long, env = "ORACLE_API_KEY", hide_env_values = true)]
    pub oracle_api_key: Option<String>,
}
