//! Data models shared by every pipeline stage.
//!
//! - [`CandidateKeyword`]: a trending topic proposed by trend discovery
//! - [`HarvestTarget`]: a (keyword, URL) pair handed to the harvester
//! - [`ArticleRecord`]: clean article text produced by a successful harvest
//! - [`KeywordBundle`]: the records of one keyword, as handed to downstream stages
//!
//! Records and bundles are serialized to JSON for the hand-off archive, so
//! their field names are part of the on-disk format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::str::FromStr;

/// Error type returned across collaborator boundaries.
///
/// `Send + Sync` so failures can be carried out of spawned tasks.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Which trend feed a run consumes, and therefore which acceptance cap applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Topics trending over the last day; run once per day at a wall-clock time.
    Daily,
    /// Topics trending over the last few hours; run on a fixed interval.
    Recent,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Daily => "daily",
            Mode::Recent => "recent",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Mode::Daily),
            "recent" => Ok(Mode::Recent),
            other => Err(format!("invalid mode: {other} (expected 'daily' or 'recent')")),
        }
    }
}

/// A trending topic that has not yet been checked for novelty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateKeyword {
    /// The keyword text as shown by the trend source.
    pub text: String,
    /// Trend status; only `"active"` candidates are considered.
    pub status: String,
    /// Related search terms or headlines discovered alongside the keyword.
    pub related_terms: Vec<String>,
    /// Approximate search volume, when the source reports one.
    pub search_volume: Option<String>,
}

impl CandidateKeyword {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: "active".to_string(),
            related_terms: Vec::new(),
            search_volume: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }
}

/// A URL to harvest, tagged with the keyword it was found for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestTarget {
    pub keyword: String,
    pub url: String,
}

impl HarvestTarget {
    pub fn new(keyword: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            url: url.into(),
        }
    }
}

/// Clean article text extracted from one URL.
///
/// Created once per successfully harvested URL; `body` has already passed
/// content validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// The source URL (unique key).
    pub url: String,
    /// The keyword the URL was harvested for.
    pub keyword: String,
    /// The page `<title>`, whitespace-collapsed.
    pub title: String,
    /// Boilerplate-free plain text.
    pub body: String,
}

/// Every article harvested for one accepted keyword.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordBundle {
    pub keyword: String,
    #[serde(default)]
    pub related_terms: Vec<String>,
    pub mode: Mode,
    pub harvested_at: DateTime<Utc>,
    pub articles: Vec<ArticleRecord>,
}
