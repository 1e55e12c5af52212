//! Pipeline configuration loaded from YAML.
//!
//! Every section carries `#[serde(default)]`, so a partial file (or no file
//! at all) yields a working configuration. Concurrency caps and batch sizes
//! are operational tuning knobs and live here rather than in code.
//!
//! ```yaml
//! harvest:
//!   max_concurrent: 8
//!   max_attempts: 3
//!   budget_secs: 180
//! dedup:
//!   window_hours: 24
//! schedule:
//!   daily_at: "08:00"
//!   interval_minutes: 120
//! downstream:
//!   max_concurrent: 2
//!   batch_size: 10
//! ```

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

use crate::models::Mode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("missing required setting {0} (set it in the environment or .env)")]
    MissingSecret(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub harvest: HarvestConfig,
    pub dedup: DedupConfig,
    pub schedule: ScheduleConfig,
    pub search: SearchConfig,
    pub trends: TrendsConfig,
    pub oracle: OracleConfig,
    pub downstream: DownstreamConfig,
}

/// Fetch, validation and retry settings for the harvester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Maximum simultaneous fetches.
    pub max_concurrent: usize,
    /// Attempts per URL, including the first.
    pub max_attempts: u32,
    /// Linear backoff step: retry `n` waits `n * retry_backoff_ms` before starting.
    pub retry_backoff_ms: u64,
    /// Connect + read timeout of a single request.
    pub request_timeout_secs: u64,
    /// Budget for parsing and cleaning one page.
    pub processing_timeout_secs: u64,
    /// Wall-clock budget of one harvest call, retries included.
    pub budget_secs: u64,
    pub max_body_bytes: usize,
    pub min_content_chars: usize,
    pub min_line_chars: usize,
    /// Hosts that never serve articles; matched on the host and its parents.
    pub blocked_domains: Vec<String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            max_attempts: 3,
            retry_backoff_ms: 1000,
            request_timeout_secs: 30,
            processing_timeout_secs: 20,
            budget_secs: 180,
            max_body_bytes: 10 * 1024 * 1024,
            min_content_chars: 100,
            min_line_chars: 4,
            blocked_domains: [
                "instagram.com",
                "facebook.com",
                "twitter.com",
                "x.com",
                "tiktok.com",
                "youtube.com",
                "reddit.com",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
        }
    }
}

impl HarvestConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Trailing window of persisted records consulted for duplicates.
    pub window_hours: u32,
    pub max_daily_topics: usize,
    pub max_recent_topics: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            max_daily_topics: 5,
            max_recent_topics: 5,
        }
    }
}

impl DedupConfig {
    pub fn max_topics(&self, mode: Mode) -> usize {
        match mode {
            Mode::Daily => self.max_daily_topics,
            Mode::Recent => self.max_recent_topics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Local wall-clock time of the daily run, `HH:MM`.
    pub daily_at: String,
    pub interval_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: "08:00".to_string(),
            interval_minutes: 120,
        }
    }
}

impl ScheduleConfig {
    pub fn daily_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(self.daily_at.trim(), "%H:%M")
            .map_err(|e| ConfigError::Invalid(format!("schedule.daily_at {:?}: {e}", self.daily_at)))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub endpoint: String,
    pub results_per_keyword: usize,
    /// Custom Search `dateRestrict` value, e.g. `d1` for the last day.
    pub date_restrict: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://www.googleapis.com/customsearch/v1".to_string(),
            results_per_keyword: 3,
            date_restrict: "d1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendsConfig {
    pub daily_feed_url: String,
    pub recent_feed_url: String,
}

impl Default for TrendsConfig {
    fn default() -> Self {
        Self {
            daily_feed_url: "https://trends.google.com/trending/rss?geo=US&hours=24".to_string(),
            recent_feed_url: "https://trends.google.com/trending/rss?geo=US&hours=4".to_string(),
        }
    }
}

impl TrendsConfig {
    pub fn feed_url(&self, mode: Mode) -> &str {
        match mode {
            Mode::Daily => &self.daily_feed_url,
            Mode::Recent => &self.recent_feed_url,
        }
    }
}

/// OpenAI-compatible chat endpoint used as the semantic similarity oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub base_url: String,
    pub model: String,
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_retries: 5,
            base_delay_ms: 1000,
            request_timeout_secs: 60,
        }
    }
}

/// Fan-out settings for handing bundles to downstream stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    pub max_concurrent: usize,
    pub batch_size: usize,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            batch_size: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, or defaults when `path` is `None`.
    #[instrument(level = "info")]
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(Path::new(path)).map_err(|source| ConfigError::Read {
                    path: path.to_string(),
                    source,
                })?;
                let config = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
                    path: path.to_string(),
                    source,
                })?;
                info!(path, "Loaded configuration file");
                config
            }
            None => {
                info!("No config file given; using defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &str); 10] = [
            (self.harvest.max_concurrent > 0, "harvest.max_concurrent must be at least 1"),
            (self.harvest.max_attempts > 0, "harvest.max_attempts must be at least 1"),
            (self.harvest.budget_secs > 0, "harvest.budget_secs must be positive"),
            (self.harvest.request_timeout_secs > 0, "harvest.request_timeout_secs must be positive"),
            (self.harvest.processing_timeout_secs > 0, "harvest.processing_timeout_secs must be positive"),
            (self.harvest.max_body_bytes > 0, "harvest.max_body_bytes must be at least 1"),
            (self.schedule.interval_minutes > 0, "schedule.interval_minutes must be positive"),
            (self.downstream.max_concurrent > 0, "downstream.max_concurrent must be at least 1"),
            (self.downstream.batch_size > 0, "downstream.batch_size must be at least 1"),
            (self.search.results_per_keyword > 0, "search.results_per_keyword must be at least 1"),
        ];
        if let Some((_, message)) = checks.iter().find(|(ok, _)| !ok) {
            return Err(ConfigError::Invalid(message.to_string()));
        }
        self.schedule.daily_time()?;
        Ok(())
    }
}
