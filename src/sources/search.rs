//! Google Custom Search JSON API.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::SearchProvider;
use crate::config::SearchConfig;
use crate::models::BoxError;
use crate::utils::truncate_for_log;

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    link: String,
}

#[derive(Clone)]
pub struct GoogleCustomSearch {
    http: reqwest::Client,
    config: SearchConfig,
    api_key: String,
    engine_id: String,
}

impl fmt::Debug for GoogleCustomSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleCustomSearch")
            .field("endpoint", &self.config.endpoint)
            .field("engine_id", &self.engine_id)
            .finish_non_exhaustive()
    }
}

impl GoogleCustomSearch {
    pub fn new(config: SearchConfig, api_key: String, engine_id: String) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            config,
            api_key,
            engine_id,
        })
    }

    /// Full request URL for `keyword`, biased towards news coverage.
    pub fn request_url(&self, keyword: &str) -> String {
        let query = format!("{} news", keyword.trim());
        format!(
            "{}?key={}&cx={}&q={}&num={}&dateRestrict={}&orderBy=relevance",
            self.config.endpoint,
            urlencoding::encode(&self.api_key),
            urlencoding::encode(&self.engine_id),
            urlencoding::encode(&query),
            self.config.results_per_keyword,
            urlencoding::encode(&self.config.date_restrict),
        )
    }
}

/// Result links in ranking order; a response without `items` has no results.
pub fn parse_links(body: &str) -> Result<Vec<String>, serde_json::Error> {
    let response: SearchResponse = serde_json::from_str(body)?;
    Ok(response
        .items
        .into_iter()
        .map(|i| i.link.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

#[async_trait]
impl SearchProvider for GoogleCustomSearch {
    #[instrument(level = "info", skip(self))]
    async fn search(&self, keyword: &str) -> Result<Vec<String>, BoxError> {
        let response = self.http.get(self.request_url(keyword)).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(%status, body = %truncate_for_log(&body, 300), "Search API request failed");
            return Err(format!(
                "search API returned {status}: {}",
                truncate_for_log(&body, 200)
            )
            .into());
        }

        let links = parse_links(&body)?;
        info!(count = links.len(), "Found search results");
        Ok(links)
    }
}
