//! Concurrent article harvesting.
//!
//! The [`Harvester`] turns a batch of [`HarvestTarget`]s into validated
//! [`ArticleRecord`]s:
//!
//! 1. **Screening**: duplicate URLs collapse to one target; non-HTTP URLs and
//!    blocked hosts (social and video platforms) are dropped without a request.
//! 2. **Fetching**: every remaining target runs on the [`BoundedPool`], with
//!    up to `max_attempts` tries and a linearly growing pause between them.
//! 3. **Validation**: status must be 200, the content type HTML, and the
//!    cleaned text at least `min_content_chars` long.
//! 4. **Aggregation**: successes and terminal failures land in two
//!    mutex-guarded collections; every screened-in URL ends up in exactly one.
//!
//! One wall-clock budget covers the whole call. Attempts still running when it
//! expires are dropped (closing their connections) and recorded as failures,
//! and no retry starts once the budget cannot cover its backoff.

pub mod extract;
pub mod fetch;

use itertools::Itertools;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::HarvestConfig;
use crate::models::{ArticleRecord, HarvestTarget};
use crate::pool::BoundedPool;
use extract::extract_article;
use fetch::{PageFetcher, is_html};

/// Terminal reason a URL produced no article.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HarvestFailure {
    #[error("request failed: {0}")]
    Request(String),
    #[error("status code {0}")]
    Status(u16),
    #[error("invalid content type: {0:?}")]
    ContentType(String),
    #[error("processing timeout")]
    ProcessingTimeout,
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("no content extracted")]
    NoContent,
    #[error("content too short (length: {0})")]
    ContentTooShort(usize),
    #[error("harvest deadline exceeded")]
    DeadlineExceeded,
    #[error("harvest task aborted: {0}")]
    TaskAborted(String),
}

/// A harvest call that produced no article at all.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("failed to harvest {} URLs", .failures.len())]
    AllFailed {
        failures: BTreeMap<String, HarvestFailure>,
    },
    #[error("none of the {submitted} targets were eligible for harvesting")]
    NoEligibleTargets { submitted: usize },
}

/// Everything one harvest call observed.
#[derive(Debug, Default)]
pub struct HarvestReport {
    pub articles: Vec<ArticleRecord>,
    pub failures: BTreeMap<String, HarvestFailure>,
    /// URLs screened out before any request was made.
    pub skipped: Vec<String>,
}

pub struct Harvester {
    fetcher: Arc<dyn PageFetcher>,
    config: Arc<HarvestConfig>,
    pool: BoundedPool,
}

impl Harvester {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: HarvestConfig) -> Self {
        let pool = BoundedPool::new(config.max_concurrent);
        Self {
            fetcher,
            config: Arc::new(config),
            pool,
        }
    }

    /// Harvest `targets`, succeeding when at least one article was produced.
    ///
    /// When nothing succeeds the error carries every failed URL with its
    /// reason, so the caller can skip just this keyword.
    pub async fn harvest(&self, targets: Vec<HarvestTarget>) -> Result<Vec<ArticleRecord>, HarvestError> {
        let submitted = targets.len();
        let report = self.harvest_report(targets).await;

        if !report.articles.is_empty() {
            return Ok(report.articles);
        }
        if report.failures.is_empty() {
            return Err(HarvestError::NoEligibleTargets { submitted });
        }
        Err(HarvestError::AllFailed {
            failures: report.failures,
        })
    }

    /// Harvest `targets` and return the full per-URL accounting.
    #[instrument(level = "info", skip_all, fields(targets = targets.len()))]
    pub async fn harvest_report(&self, targets: Vec<HarvestTarget>) -> HarvestReport {
        let started = std::time::Instant::now();
        let deadline = Instant::now() + self.config.budget();
        let (eligible, skipped) = self.screen_targets(targets);

        let articles = Arc::new(Mutex::new(Vec::with_capacity(eligible.len())));
        let failures = Arc::new(Mutex::new(BTreeMap::new()));
        let urls: Vec<String> = eligible.iter().map(|t| t.url.clone()).collect();

        let tasks: Vec<_> = eligible
            .into_iter()
            .map(|target| {
                let fetcher = Arc::clone(&self.fetcher);
                let config = Arc::clone(&self.config);
                let articles = Arc::clone(&articles);
                let failures = Arc::clone(&failures);
                async move {
                    let url = target.url.clone();
                    match harvest_target(fetcher.as_ref(), &config, target, deadline).await {
                        Ok(record) => lock(&articles).push(record),
                        Err(failure) => {
                            lock(&failures).insert(url, failure);
                        }
                    }
                }
            })
            .collect();

        let outcomes = self.pool.run(tasks).await;

        for (url, outcome) in urls.into_iter().zip(outcomes) {
            if let Err(e) = outcome {
                lock(&failures)
                    .entry(url)
                    .or_insert_with(|| HarvestFailure::TaskAborted(e.to_string()));
            }
        }

        let report = HarvestReport {
            articles: std::mem::take(&mut *lock(&articles)),
            failures: std::mem::take(&mut *lock(&failures)),
            skipped,
        };

        info!(
            attempted = report.articles.len() + report.failures.len(),
            succeeded = report.articles.len(),
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Harvest summary"
        );
        for (url, reason) in &report.failures {
            warn!(%url, %reason, "URL failed after all attempts");
        }

        report
    }

    /// Split targets into those worth fetching and the URLs dropped up front.
    fn screen_targets(&self, targets: Vec<HarvestTarget>) -> (Vec<HarvestTarget>, Vec<String>) {
        let mut eligible = Vec::new();
        let mut skipped = Vec::new();

        for target in targets.into_iter().unique_by(|t| t.url.clone()) {
            match screen_url(&target.url, &self.config.blocked_domains) {
                Ok(()) => eligible.push(target),
                Err(reason) => {
                    debug!(url = %target.url, reason, "Skipping target");
                    skipped.push(target.url);
                }
            }
        }

        (eligible, skipped)
    }
}

fn screen_url(url: &str, blocked_domains: &[String]) -> Result<(), &'static str> {
    let parsed = Url::parse(url).map_err(|_| "unparseable URL")?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err("non-HTTP scheme");
    }
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let blocked = blocked_domains.iter().any(|domain| {
        let domain = domain.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    });
    if blocked {
        return Err("blocked domain");
    }
    Ok(())
}

/// Run the attempt loop for one target.
#[instrument(level = "info", skip_all, fields(url = %target.url, keyword = %target.keyword))]
async fn harvest_target(
    fetcher: &dyn PageFetcher,
    config: &HarvestConfig,
    target: HarvestTarget,
    deadline: Instant,
) -> Result<ArticleRecord, HarvestFailure> {
    let mut last_failure = HarvestFailure::DeadlineExceeded;

    for attempt in 1..=config.max_attempts {
        if attempt > 1 {
            let delay = config.retry_backoff() * (attempt - 1);
            if Instant::now() + delay >= deadline {
                warn!(attempt, "Harvest budget cannot cover another attempt");
                break;
            }
            debug!(attempt, ?delay, "Retrying after backoff");
            sleep(delay).await;
        }
        if Instant::now() >= deadline {
            break;
        }

        match timeout_at(deadline, attempt_once(fetcher, config, &target)).await {
            Ok(Ok(record)) => {
                info!(attempt, chars = record.body.chars().count(), "Harvested article");
                return Ok(record);
            }
            Ok(Err(failure)) => {
                warn!(attempt, max = config.max_attempts, error = %failure, "Harvest attempt failed");
                last_failure = failure;
            }
            Err(_) => {
                warn!(attempt, "Harvest budget expired mid-attempt");
                return Err(HarvestFailure::DeadlineExceeded);
            }
        }
    }

    Err(last_failure)
}

/// One fetch, validate and extract pass.
async fn attempt_once(
    fetcher: &dyn PageFetcher,
    config: &HarvestConfig,
    target: &HarvestTarget,
) -> Result<ArticleRecord, HarvestFailure> {
    let page = fetcher
        .fetch(&target.url)
        .await
        .map_err(|e| HarvestFailure::Request(e.to_string()))?;

    if page.status != 200 {
        return Err(HarvestFailure::Status(page.status));
    }
    let content_type = page.content_type.unwrap_or_default();
    if !is_html(&content_type) {
        return Err(HarvestFailure::ContentType(content_type));
    }

    let html = String::from_utf8_lossy(&page.body).into_owned();
    let min_line_chars = config.min_line_chars;
    let extracted = match timeout(
        config.processing_timeout(),
        tokio::task::spawn_blocking(move || extract_article(&html, min_line_chars)),
    )
    .await
    {
        Err(_) => return Err(HarvestFailure::ProcessingTimeout),
        Ok(Err(e)) => return Err(HarvestFailure::Extraction(e.to_string())),
        Ok(Ok(extracted)) => extracted,
    };

    let chars = extracted.text.chars().count();
    if chars == 0 {
        return Err(HarvestFailure::NoContent);
    }
    if chars < config.min_content_chars {
        return Err(HarvestFailure::ContentTooShort(chars));
    }

    Ok(ArticleRecord {
        url: target.url.clone(),
        keyword: target.keyword.clone(),
        title: extracted.title,
        body: extracted.text,
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
