//! One end-to-end ingestion run.
//!
//! A run discovers trending keywords, keeps the novel ones, harvests articles
//! for each and hands the resulting bundles to the downstream sink:
//!
//! 1. **Discovery**: the [`TrendSource`] proposes candidates for the mode.
//! 2. **Selection**: the [`DedupFilter`] accepts up to the mode's cap.
//! 3. **Harvest**: for each accepted keyword, in order, search for URLs and
//!    harvest them concurrently. A keyword that yields nothing is skipped.
//! 4. **Delivery**: bundles go to the [`ArticleSink`] through a bounded pool,
//!    one batch at a time. Delivery failures are logged and counted.
//!
//! The dedup filter is locked for the whole run, so two runs (daily and
//! recent) never interleave their selection and persistence.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::config::{AppConfig, DedupConfig};
use crate::dedup::DedupFilter;
use crate::harvest::Harvester;
use crate::models::{BoxError, HarvestTarget, KeywordBundle, Mode};
use crate::outputs::ArticleSink;
use crate::pool::BoundedPool;
use crate::scheduler::PipelineRunner;
use crate::sources::{SearchProvider, TrendSource};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("trend discovery failed: {0}")]
    Discovery(BoxError),
    #[error("no trending keywords found")]
    NoTrends,
    #[error("none of the {candidates} trending keywords were novel")]
    NoNovelTopics { candidates: usize },
    #[error("no articles harvested for any of {keywords} keywords")]
    AllHarvestsFailed { keywords: usize },
}

/// What one successful run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub mode: Mode,
    pub candidates: usize,
    pub accepted: Vec<String>,
    pub harvested_keywords: usize,
    pub articles: usize,
    pub failed_urls: usize,
    pub delivered: usize,
    pub elapsed: Duration,
}

pub struct Pipeline {
    trends: Arc<dyn TrendSource>,
    search: Arc<dyn SearchProvider>,
    dedup: Mutex<DedupFilter>,
    harvester: Harvester,
    sink: Arc<dyn ArticleSink>,
    downstream: BoundedPool,
    dedup_config: DedupConfig,
    batch_size: usize,
}

impl Pipeline {
    pub fn new(
        trends: Arc<dyn TrendSource>,
        search: Arc<dyn SearchProvider>,
        dedup: DedupFilter,
        harvester: Harvester,
        sink: Arc<dyn ArticleSink>,
        config: &AppConfig,
    ) -> Self {
        Self {
            trends,
            search,
            dedup: Mutex::new(dedup),
            harvester,
            sink,
            downstream: BoundedPool::new(config.downstream.max_concurrent),
            dedup_config: config.dedup.clone(),
            batch_size: config.downstream.batch_size.max(1),
        }
    }

    #[instrument(level = "info", skip(self), fields(mode = %mode))]
    pub async fn run(&self, mode: Mode) -> Result<RunSummary, PipelineError> {
        let started = Instant::now();
        let mut dedup = self.dedup.lock().await;

        let candidates = self.trends.discover(mode).await.map_err(|e| {
            error!(error = %e, "Trend discovery failed");
            PipelineError::Discovery(e)
        })?;
        if candidates.is_empty() {
            warn!("Trend source returned no keywords");
            return Err(PipelineError::NoTrends);
        }
        let candidate_count = candidates.len();

        dedup.reset(self.dedup_config.max_topics(mode));
        let accepted = dedup.select(candidates).await;
        if accepted.is_empty() {
            warn!(candidates = candidate_count, "No novel keywords this run");
            return Err(PipelineError::NoNovelTopics {
                candidates: candidate_count,
            });
        }

        let mut bundles = Vec::with_capacity(accepted.len());
        let mut failed_urls = 0;
        for keyword in &accepted {
            let urls = match self.search.search(&keyword.text).await {
                Ok(urls) if !urls.is_empty() => urls,
                Ok(_) => {
                    warn!(keyword = %keyword.text, "Search returned no URLs; skipping keyword");
                    continue;
                }
                Err(e) => {
                    warn!(keyword = %keyword.text, error = %e, "Search failed; skipping keyword");
                    continue;
                }
            };

            let targets = urls
                .into_iter()
                .map(|url| HarvestTarget::new(keyword.text.clone(), url))
                .collect();
            let report = self.harvester.harvest_report(targets).await;
            failed_urls += report.failures.len();

            if report.articles.is_empty() {
                warn!(keyword = %keyword.text, failed = report.failures.len(), "No articles harvested; skipping keyword");
                continue;
            }
            bundles.push(KeywordBundle {
                keyword: keyword.text.clone(),
                related_terms: keyword.related_terms.clone(),
                mode,
                harvested_at: Utc::now(),
                articles: report.articles,
            });
        }

        if bundles.is_empty() {
            return Err(PipelineError::AllHarvestsFailed {
                keywords: accepted.len(),
            });
        }

        let harvested_keywords = bundles.len();
        let articles = bundles.iter().map(|b| b.articles.len()).sum();
        let delivered = self.deliver(bundles).await;

        let summary = RunSummary {
            mode,
            candidates: candidate_count,
            accepted: accepted.into_iter().map(|k| k.text).collect(),
            harvested_keywords,
            articles,
            failed_urls,
            delivered,
            elapsed: started.elapsed(),
        };
        info!(
            candidates = summary.candidates,
            accepted = summary.accepted.len(),
            harvested_keywords,
            articles,
            failed_urls,
            delivered,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Run complete"
        );
        Ok(summary)
    }

    /// Hand bundles to the sink in batches; returns how many were accepted.
    async fn deliver(&self, bundles: Vec<KeywordBundle>) -> usize {
        let mut delivered = 0;
        let mut remaining = bundles.into_iter().peekable();

        while remaining.peek().is_some() {
            let batch: Vec<KeywordBundle> = remaining.by_ref().take(self.batch_size).collect();
            let keywords: Vec<String> = batch.iter().map(|b| b.keyword.clone()).collect();
            let tasks: Vec<_> = batch
                .into_iter()
                .map(|bundle| {
                    let sink = Arc::clone(&self.sink);
                    async move { sink.deliver(&bundle).await }
                })
                .collect();

            for (keyword, outcome) in keywords.iter().zip(self.downstream.run(tasks).await) {
                match outcome {
                    Ok(Ok(())) => delivered += 1,
                    Ok(Err(e)) => error!(%keyword, error = %e, "Bundle delivery failed"),
                    Err(e) => error!(%keyword, error = %e, "Bundle delivery task aborted"),
                }
            }
        }

        delivered
    }
}

#[async_trait]
impl PipelineRunner for Pipeline {
    async fn run(&self, mode: Mode) -> Result<RunSummary, PipelineError> {
        Pipeline::run(self, mode).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarvestConfig;
    use crate::dedup::{RecentRecords, SimilarityOracle, contains_either};
    use crate::harvest::fetch::{FetchedPage, PageFetcher};
    use crate::models::CandidateKeyword;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PARAGRAPH: &str = "The agency confirmed the launch window late on Tuesday, and engineers \
        said the final fueling tests had been completed without any of the earlier valve problems.";

    struct FakeTrends {
        keywords: Result<Vec<&'static str>, &'static str>,
    }

    #[async_trait]
    impl TrendSource for FakeTrends {
        async fn discover(&self, _mode: Mode) -> Result<Vec<CandidateKeyword>, BoxError> {
            match &self.keywords {
                Ok(words) => Ok(words.iter().map(|w| CandidateKeyword::new(*w)).collect()),
                Err(e) => Err((*e).into()),
            }
        }
    }

    #[derive(Default)]
    struct FakeSearch {
        results: HashMap<&'static str, Vec<&'static str>>,
        failing: HashSet<&'static str>,
    }

    #[async_trait]
    impl SearchProvider for FakeSearch {
        async fn search(&self, keyword: &str) -> Result<Vec<String>, BoxError> {
            if self.failing.contains(keyword) {
                return Err("quota exceeded".into());
            }
            Ok(self
                .results
                .get(keyword)
                .map(|urls| urls.iter().map(|u| u.to_string()).collect())
                .unwrap_or_default())
        }
    }

    /// Serves an article for every URL containing "good" and a 404 otherwise.
    struct FakeFetcher;

    #[async_trait]
    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, BoxError> {
            if !url.contains("good") {
                return Ok(FetchedPage {
                    status: 404,
                    content_type: Some("text/html".to_string()),
                    body: Vec::new(),
                });
            }
            Ok(FetchedPage {
                status: 200,
                content_type: Some("text/html".to_string()),
                body: format!(
                    "<html><head><title>Launch</title></head><body><article><p>{PARAGRAPH}</p></article></body></html>"
                )
                .into_bytes(),
            })
        }
    }

    #[derive(Default)]
    struct FakeRecords {
        persisted: Vec<&'static str>,
    }

    #[async_trait]
    impl RecentRecords for FakeRecords {
        async fn exists_similar(&self, keyword: &str, _window_hours: u32) -> Result<bool, BoxError> {
            Ok(self.persisted.iter().any(|p| contains_either(p, keyword)))
        }

        async fn recent_keywords(&self, _window_hours: u32) -> Result<Vec<String>, BoxError> {
            Ok(self.persisted.iter().map(|p| p.to_string()).collect())
        }
    }

    /// Treats "moon landing" and "lunar mission" as the same story.
    struct FakeOracle;

    #[async_trait]
    impl SimilarityOracle for FakeOracle {
        async fn is_similar(&self, candidate: &str, reference: &[String]) -> Result<bool, BoxError> {
            let story = ["moon landing", "lunar mission"];
            Ok(story.contains(&candidate) && reference.iter().any(|r| story.contains(&r.as_str())))
        }
    }

    #[derive(Default)]
    struct FakeSink {
        delivered: StdMutex<Vec<KeywordBundle>>,
        fail_for: Option<&'static str>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl ArticleSink for FakeSink {
        async fn deliver(&self, bundle: &KeywordBundle) -> Result<(), BoxError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_for == Some(bundle.keyword.as_str()) {
                return Err("disk full".into());
            }
            self.delivered.lock().unwrap().push(bundle.clone());
            Ok(())
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.harvest = HarvestConfig {
            max_attempts: 1,
            retry_backoff_ms: 1,
            budget_secs: 10,
            ..HarvestConfig::default()
        };
        config.dedup.max_daily_topics = 3;
        config.downstream.max_concurrent = 2;
        config.downstream.batch_size = 2;
        config
    }

    fn pipeline(
        trends: FakeTrends,
        search: FakeSearch,
        records: FakeRecords,
        sink: Arc<FakeSink>,
        config: &AppConfig,
    ) -> Pipeline {
        let dedup = DedupFilter::new(
            Arc::new(records),
            Arc::new(FakeOracle),
            config.dedup.window_hours,
            config.dedup.max_topics(Mode::Daily),
        );
        let harvester = Harvester::new(Arc::new(FakeFetcher), config.harvest.clone());
        Pipeline::new(Arc::new(trends), Arc::new(search), dedup, harvester, sink, config)
    }

    fn search_for(pairs: &[(&'static str, &[&'static str])]) -> FakeSearch {
        FakeSearch {
            results: pairs.iter().map(|(k, urls)| (*k, urls.to_vec())).collect(),
            ..FakeSearch::default()
        }
    }

    #[tokio::test]
    async fn test_run_delivers_bundles_for_novel_keywords() {
        let sink = Arc::new(FakeSink::default());
        let config = config();
        let pipeline = pipeline(
            FakeTrends {
                keywords: Ok(vec!["moon landing", "lunar mission", "world series"]),
            },
            search_for(&[
                ("moon landing", &["https://news.example/good-1", "https://news.example/missing"]),
                ("world series", &["https://sports.example/good-2"]),
            ]),
            FakeRecords::default(),
            sink.clone(),
            &config,
        );

        let summary = pipeline.run(Mode::Daily).await.unwrap();

        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.accepted, vec!["moon landing".to_string(), "world series".to_string()]);
        assert_eq!(summary.harvested_keywords, 2);
        assert_eq!(summary.articles, 2);
        assert_eq!(summary.failed_urls, 1);
        assert_eq!(summary.delivered, 2);

        let delivered = sink.delivered.lock().unwrap();
        let moon = delivered.iter().find(|b| b.keyword == "moon landing").unwrap();
        assert_eq!(moon.mode, Mode::Daily);
        assert_eq!(moon.articles.len(), 1);
        assert_eq!(moon.articles[0].url, "https://news.example/good-1");
        assert_eq!(moon.articles[0].keyword, "moon landing");
    }

    #[tokio::test]
    async fn test_discovery_failure_is_fatal() {
        let config = config();
        let pipeline = pipeline(
            FakeTrends {
                keywords: Err("feed unavailable"),
            },
            FakeSearch::default(),
            FakeRecords::default(),
            Arc::new(FakeSink::default()),
            &config,
        );

        assert!(matches!(pipeline.run(Mode::Daily).await, Err(PipelineError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_empty_feed_is_no_trends() {
        let config = config();
        let pipeline = pipeline(
            FakeTrends { keywords: Ok(vec![]) },
            FakeSearch::default(),
            FakeRecords::default(),
            Arc::new(FakeSink::default()),
            &config,
        );

        assert!(matches!(pipeline.run(Mode::Recent).await, Err(PipelineError::NoTrends)));
    }

    #[tokio::test]
    async fn test_all_recently_covered_is_no_novel_topics() {
        let config = config();
        let pipeline = pipeline(
            FakeTrends {
                keywords: Ok(vec!["election results", "Election"]),
            },
            FakeSearch::default(),
            FakeRecords {
                persisted: vec!["election results today"],
            },
            Arc::new(FakeSink::default()),
            &config,
        );

        match pipeline.run(Mode::Daily).await {
            Err(PipelineError::NoNovelTopics { candidates }) => assert_eq!(candidates, 2),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_search_skips_only_that_keyword() {
        let sink = Arc::new(FakeSink::default());
        let config = config();
        let mut search = search_for(&[("world series", &["https://sports.example/good-2"])]);
        search.failing.insert("moon landing");
        let pipeline = pipeline(
            FakeTrends {
                keywords: Ok(vec!["moon landing", "world series"]),
            },
            search,
            FakeRecords::default(),
            sink.clone(),
            &config,
        );

        let summary = pipeline.run(Mode::Daily).await.unwrap();

        assert_eq!(summary.accepted.len(), 2);
        assert_eq!(summary.harvested_keywords, 1);
        assert_eq!(sink.delivered.lock().unwrap()[0].keyword, "world series");
    }

    #[tokio::test]
    async fn test_nothing_harvested_is_all_harvests_failed() {
        let config = config();
        let pipeline = pipeline(
            FakeTrends {
                keywords: Ok(vec!["moon landing", "world series"]),
            },
            search_for(&[
                ("moon landing", &["https://news.example/missing"]),
                ("world series", &["https://twitter.com/mlb/status/1"]),
            ]),
            FakeRecords::default(),
            Arc::new(FakeSink::default()),
            &config,
        );

        match pipeline.run(Mode::Daily).await {
            Err(PipelineError::AllHarvestsFailed { keywords }) => assert_eq!(keywords, 2),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delivery_failure_is_counted_not_fatal() {
        let sink = Arc::new(FakeSink {
            fail_for: Some("world series"),
            ..FakeSink::default()
        });
        let config = config();
        let pipeline = pipeline(
            FakeTrends {
                keywords: Ok(vec!["moon landing", "world series"]),
            },
            search_for(&[
                ("moon landing", &["https://news.example/good-1"]),
                ("world series", &["https://sports.example/good-2"]),
            ]),
            FakeRecords::default(),
            sink.clone(),
            &config,
        );

        let summary = pipeline.run(Mode::Daily).await.unwrap();

        assert_eq!(summary.harvested_keywords, 2);
        assert_eq!(summary.delivered, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_delivery_respects_downstream_concurrency() {
        let sink = Arc::new(FakeSink::default());
        let mut config = config();
        config.dedup.max_daily_topics = 5;
        config.downstream.max_concurrent = 2;
        config.downstream.batch_size = 10;
        let pipeline = pipeline(
            FakeTrends {
                keywords: Ok(vec!["alpha", "bravo", "charlie", "delta", "echo"]),
            },
            search_for(&[
                ("alpha", &["https://a.example/good"]),
                ("bravo", &["https://b.example/good"]),
                ("charlie", &["https://c.example/good"]),
                ("delta", &["https://d.example/good"]),
                ("echo", &["https://e.example/good"]),
            ]),
            FakeRecords::default(),
            sink.clone(),
            &config,
        );

        let summary = pipeline.run(Mode::Daily).await.unwrap();

        assert_eq!(summary.delivered, 5);
        assert!(sink.max_in_flight.load(Ordering::SeqCst) <= 2);
    }
}
