//! Page fetching.
//!
//! [`PageFetcher`] is the harvester's only network seam. [`HttpFetcher`]
//! implements it with a pooled `reqwest` client that presents itself as a
//! desktop browser and caps how much of a body it will buffer.

use async_trait::async_trait;
use rand::rng;
use rand::seq::IndexedRandom;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::HarvestConfig;
use crate::models::BoxError;

/// Desktop browser identities; one is picked per request.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

/// The parts of an HTTP response the harvester validates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub content_type: Option<String>,
    /// Body bytes, at most the configured cap. Empty when the status or
    /// content type already rules the page out.
    pub body: Vec<u8>,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Issue one GET for `url`. Transport failures are errors; HTTP error
    /// statuses are returned as pages for the caller to judge.
    async fn fetch(&self, url: &str) -> Result<FetchedPage, BoxError>;
}

/// True when a `Content-Type` header value denotes an HTML document.
pub fn is_html(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.contains("text/html") || lower.contains("application/xhtml+xml")
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &HarvestConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<FetchedPage, BoxError> {
        let user_agent = USER_AGENTS.choose(&mut rng()).copied().unwrap_or(USER_AGENTS[0]);

        let mut response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .header(ACCEPT, ACCEPT_HTML)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .send()
            .await?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        if status == 200 && content_type.as_deref().is_some_and(is_html) {
            while let Some(chunk) = response.chunk().await? {
                let room = self.max_body_bytes.saturating_sub(body.len());
                if chunk.len() >= room {
                    body.extend_from_slice(&chunk[..room]);
                    debug!(cap = self.max_body_bytes, "Body truncated at size cap");
                    break;
                }
                body.extend_from_slice(&chunk);
            }
        }

        debug!(status, bytes = body.len(), "Fetched page");
        Ok(FetchedPage {
            status,
            content_type,
            body,
        })
    }
}
