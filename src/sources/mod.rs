//! Upstream collaborators: where candidate keywords and article URLs come from.
//!
//! - [`trends`]: trending topics from the public Google Trends RSS feed
//! - [`search`]: news URLs for a keyword from the Custom Search JSON API

use async_trait::async_trait;

use crate::models::{BoxError, CandidateKeyword, Mode};

pub mod search;
pub mod trends;

/// Proposes trending keywords for a run.
#[async_trait]
pub trait TrendSource: Send + Sync {
    /// Candidates in the order the source ranks them.
    async fn discover(&self, mode: Mode) -> Result<Vec<CandidateKeyword>, BoxError>;
}

/// Finds article URLs for an accepted keyword.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, keyword: &str) -> Result<Vec<String>, BoxError>;
}
