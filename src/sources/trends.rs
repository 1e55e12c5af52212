//! Google Trends RSS feed.
//!
//! Each `<item>` is one trending search. The `ht:` extension elements carry the
//! approximate traffic and the news headlines Google groups under the trend.
//! The deserializer matches them by local name, without the prefix:
//!
//! ```xml
//! <item>
//!   <title>solar eclipse</title>
//!   <ht:approx_traffic>500K+</ht:approx_traffic>
//!   <ht:news_item>
//!     <ht:news_item_title>Eclipse crosses North America</ht:news_item_title>
//!   </ht:news_item>
//! </item>
//! ```

use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::TrendSource;
use crate::config::TrendsConfig;
use crate::models::{BoxError, CandidateKeyword, Mode};
use crate::utils::truncate_for_log;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    approx_traffic: Option<String>,
    #[serde(rename = "news_item", default)]
    news_items: Vec<NewsItem>,
}

#[derive(Debug, Deserialize)]
struct NewsItem {
    #[serde(rename = "news_item_title")]
    title: Option<String>,
}

/// Parse a trends feed into candidates, in feed order.
///
/// Items without a title are dropped. Feed items are all currently trending,
/// so every candidate is `active`.
pub fn parse_feed(xml: &str) -> Result<Vec<CandidateKeyword>, quick_xml::de::DeError> {
    let rss: Rss = from_str(xml)?;
    let candidates = rss
        .channel
        .items
        .into_iter()
        .filter_map(|item| {
            let text = item.title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())?;
            let mut candidate = CandidateKeyword::new(text);
            candidate.search_volume = item.approx_traffic.map(|t| t.trim().to_string());
            candidate.related_terms = item
                .news_items
                .into_iter()
                .filter_map(|n| n.title)
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            Some(candidate)
        })
        .collect();
    Ok(candidates)
}

#[derive(Debug, Clone)]
pub struct GoogleTrendsFeed {
    http: reqwest::Client,
    config: TrendsConfig,
}

impl GoogleTrendsFeed {
    pub fn new(config: TrendsConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl TrendSource for GoogleTrendsFeed {
    #[instrument(level = "info", skip(self))]
    async fn discover(&self, mode: Mode) -> Result<Vec<CandidateKeyword>, BoxError> {
        let url = self.config.feed_url(mode);
        let t0 = Instant::now();
        let response = self.http.get(url).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(%status, url, body = %truncate_for_log(&body, 300), "Trends feed request failed");
            return Err(format!("trends feed returned {status}").into());
        }

        let candidates = parse_feed(&body)?;
        debug!(elapsed_ms = t0.elapsed().as_millis() as u64, "Parsed trends feed");
        info!(count = candidates.len(), "Discovered trending keywords");
        Ok(candidates)
    }
}
