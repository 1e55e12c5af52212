//! Keyword deduplication.
//!
//! [`DedupFilter`] decides whether a trending keyword is new enough to write
//! about. Each candidate goes through two checks, in order:
//!
//! 1. **Recency lookup**: a case-insensitive containment match against
//!    keywords persisted within the last `window_hours`. Cheap, no model call.
//! 2. **Semantic check**: the [`SimilarityOracle`] compares the candidate with
//!    the persisted keywords plus everything already accepted in this run.
//!
//! Acceptance mutates the in-run set that later candidates are compared
//! against, so candidates must be evaluated one at a time, in order.
//!
//! # Failure policy
//!
//! An oracle error fails open: the candidate is treated as not similar and
//! the run keeps moving. A recency lookup error is the exception: the
//! candidate is only novel when the lookup itself succeeded, so a failed
//! lookup rejects it (with a warning) rather than risk a duplicate article.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::models::{BoxError, CandidateKeyword};

/// Read-only view of recently persisted keywords.
#[async_trait]
pub trait RecentRecords: Send + Sync {
    /// Whether a keyword persisted within the window contains, or is
    /// contained in, `keyword` (case-insensitive).
    async fn exists_similar(&self, keyword: &str, window_hours: u32) -> Result<bool, BoxError>;

    /// Every keyword persisted within the window.
    async fn recent_keywords(&self, window_hours: u32) -> Result<Vec<String>, BoxError>;
}

/// External judge of semantic similarity.
#[async_trait]
pub trait SimilarityOracle: Send + Sync {
    /// Whether `candidate` means the same thing as any entry of `reference`.
    async fn is_similar(&self, candidate: &str, reference: &[String]) -> Result<bool, BoxError>;
}

/// Sequential, order-sensitive novelty filter for one pipeline run.
pub struct DedupFilter {
    records: Arc<dyn RecentRecords>,
    oracle: Arc<dyn SimilarityOracle>,
    window_hours: u32,
    max_accepted: usize,
    /// Keywords accepted so far in the current run.
    accepted: Vec<String>,
    /// Persisted keywords, loaded once per run on first use.
    persisted: Option<Vec<String>>,
}

impl DedupFilter {
    pub fn new(
        records: Arc<dyn RecentRecords>,
        oracle: Arc<dyn SimilarityOracle>,
        window_hours: u32,
        max_accepted: usize,
    ) -> Self {
        Self {
            records,
            oracle,
            window_hours,
            max_accepted,
            accepted: Vec::new(),
            persisted: None,
        }
    }

    /// Start a new run: forget accepted keywords and set the acceptance cap.
    pub fn reset(&mut self, max_accepted: usize) {
        self.accepted.clear();
        self.persisted = None;
        self.max_accepted = max_accepted;
    }

    pub fn accepted(&self) -> &[String] {
        &self.accepted
    }

    pub fn is_full(&self) -> bool {
        self.accepted.len() >= self.max_accepted
    }

    /// Decide whether `candidate` is novel; accepted keywords join the
    /// in-run reference set immediately.
    ///
    /// Returns `false` without consulting any collaborator once the cap has
    /// been reached.
    #[instrument(level = "info", skip_all, fields(keyword = %candidate.text))]
    pub async fn accept(&mut self, candidate: &CandidateKeyword) -> bool {
        if self.is_full() {
            debug!("Acceptance cap reached; not evaluating");
            return false;
        }
        let keyword = candidate.text.trim();
        if keyword.is_empty() {
            return false;
        }

        if self.accepted.iter().any(|a| contains_either(a, keyword)) {
            info!("Rejected: matches a keyword accepted earlier in this run");
            return false;
        }

        match self.records.exists_similar(keyword, self.window_hours).await {
            Ok(true) => {
                info!(window_hours = self.window_hours, "Rejected: recent article exists");
                return false;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(error = %e, "Recent-records lookup failed; skipping candidate");
                return false;
            }
        }

        let reference = self.reference_set().await;
        if !reference.is_empty() {
            match self.oracle.is_similar(keyword, &reference).await {
                Ok(true) => {
                    info!(reference = reference.len(), "Rejected: semantically similar keyword exists");
                    return false;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "Similarity oracle failed; treating candidate as novel");
                }
            }
        }

        self.accepted.push(keyword.to_string());
        info!(accepted = self.accepted.len(), max = self.max_accepted, "Accepted keyword");
        true
    }

    /// Evaluate `candidates` in order and return the accepted ones, stopping
    /// as soon as the cap is met. Inactive candidates are passed over without
    /// any lookup.
    #[instrument(level = "info", skip_all, fields(candidates = candidates.len(), max = self.max_accepted))]
    pub async fn select(&mut self, candidates: Vec<CandidateKeyword>) -> Vec<CandidateKeyword> {
        let mut selected = Vec::new();
        for candidate in candidates {
            if self.is_full() {
                break;
            }
            if !candidate.is_active() {
                debug!(keyword = %candidate.text, status = %candidate.status, "Skipping inactive candidate");
                continue;
            }
            if self.accept(&candidate).await {
                selected.push(candidate);
            }
        }
        info!(selected = selected.len(), "Keyword selection finished");
        selected
    }

    async fn reference_set(&mut self) -> Vec<String> {
        if self.persisted.is_none() {
            let persisted = match self.records.recent_keywords(self.window_hours).await {
                Ok(keywords) => keywords,
                Err(e) => {
                    warn!(error = %e, "Could not load recent keywords; comparing against this run only");
                    Vec::new()
                }
            };
            self.persisted = Some(persisted);
        }

        let mut reference = self.persisted.clone().unwrap_or_default();
        reference.extend(self.accepted.iter().cloned());
        reference
    }
}

/// Case-insensitive containment in either direction.
pub fn contains_either(a: &str, b: &str) -> bool {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a.contains(&b) || b.contains(&a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeRecords {
        persisted: Vec<String>,
        lookup_fails: bool,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl RecentRecords for FakeRecords {
        async fn exists_similar(&self, keyword: &str, _window_hours: u32) -> Result<bool, BoxError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.lookup_fails {
                return Err("database unavailable".into());
            }
            Ok(self.persisted.iter().any(|p| contains_either(p, keyword)))
        }

        async fn recent_keywords(&self, _window_hours: u32) -> Result<Vec<String>, BoxError> {
            Ok(self.persisted.clone())
        }
    }

    /// Oracle that treats keywords in the same group as similar.
    #[derive(Default)]
    struct FakeOracle {
        groups: Vec<HashSet<&'static str>>,
        fails: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeOracle {
        fn with_groups(groups: &[&[&'static str]]) -> Self {
            Self {
                groups: groups.iter().map(|g| g.iter().copied().collect()).collect(),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SimilarityOracle for FakeOracle {
        async fn is_similar(&self, candidate: &str, reference: &[String]) -> Result<bool, BoxError> {
            self.calls.lock().unwrap().push(candidate.to_string());
            if self.fails {
                return Err("oracle quota exceeded".into());
            }
            Ok(self.groups.iter().any(|group| {
                group.contains(candidate) && reference.iter().any(|r| group.contains(r.as_str()))
            }))
        }
    }

    fn filter(records: Arc<FakeRecords>, oracle: Arc<FakeOracle>, max: usize) -> DedupFilter {
        DedupFilter::new(records, oracle, 24, max)
    }

    fn candidates(words: &[&str]) -> Vec<CandidateKeyword> {
        words.iter().map(|w| CandidateKeyword::new(*w)).collect()
    }

    #[tokio::test]
    async fn test_similar_candidate_is_rejected_in_order() {
        let oracle = Arc::new(FakeOracle::with_groups(&[&["A", "B"]]));
        let mut filter = filter(Arc::new(FakeRecords::default()), oracle, 5);

        let mut verdicts = Vec::new();
        for candidate in candidates(&["A", "B", "C"]) {
            verdicts.push(filter.accept(&candidate).await);
        }

        assert_eq!(verdicts, vec![true, false, true]);
        assert_eq!(filter.accepted(), &["A".to_string(), "C".to_string()]);
    }

    #[tokio::test]
    async fn test_cap_stops_evaluation() {
        let oracle = Arc::new(FakeOracle::default());
        let records = Arc::new(FakeRecords::default());
        let mut filter = filter(records.clone(), oracle.clone(), 2);

        let selected = filter
            .select(candidates(&["alpha", "beta", "gamma", "delta"]))
            .await;

        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].text, "alpha");
        assert_eq!(selected[1].text, "beta");
        // alpha had nothing to compare against; beta was compared with alpha.
        assert_eq!(oracle.calls(), vec!["beta".to_string()]);
        assert_eq!(records.lookups.load(Ordering::SeqCst), 2);
        assert!(!filter.accept(&CandidateKeyword::new("epsilon")).await);
        assert_eq!(records.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_oracle_failure_fails_open() {
        let oracle = Arc::new(FakeOracle {
            fails: true,
            ..FakeOracle::default()
        });
        let mut filter = filter(Arc::new(FakeRecords::default()), oracle.clone(), 5);

        let selected = filter.select(candidates(&["storm", "hurricane", "flood"])).await;

        assert_eq!(selected.len(), 3);
        assert_eq!(oracle.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_recent_record_substring_rejects_without_oracle() {
        let records = Arc::new(FakeRecords {
            persisted: vec!["Taylor Swift Tour".to_string()],
            ..FakeRecords::default()
        });
        let oracle = Arc::new(FakeOracle::default());
        let mut filter = filter(records, oracle.clone(), 5);

        assert!(!filter.accept(&CandidateKeyword::new("taylor swift")).await);
        assert!(oracle.calls().is_empty());
    }

    #[tokio::test]
    async fn test_persisted_keywords_reach_the_oracle() {
        let records = Arc::new(FakeRecords {
            persisted: vec!["world cup final".to_string()],
            ..FakeRecords::default()
        });
        let oracle = Arc::new(FakeOracle::with_groups(&[&["world cup final", "argentina vs france"]]));
        let mut filter = filter(records, oracle.clone(), 5);

        assert!(!filter.accept(&CandidateKeyword::new("argentina vs france")).await);
        assert!(filter.accept(&CandidateKeyword::new("eclipse")).await);
        assert_eq!(oracle.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_lookup_failure_skips_candidate() {
        let records = Arc::new(FakeRecords {
            lookup_fails: true,
            ..FakeRecords::default()
        });
        let oracle = Arc::new(FakeOracle::default());
        let mut filter = filter(records, oracle.clone(), 5);

        assert!(!filter.accept(&CandidateKeyword::new("election")).await);
        assert!(filter.accepted().is_empty());
        assert!(oracle.calls().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_candidates_are_passed_over() {
        let records = Arc::new(FakeRecords::default());
        let mut filter = filter(records.clone(), Arc::new(FakeOracle::default()), 5);
        let mut list = candidates(&["old news", "fresh news"]);
        list[0].status = "Lasted 10 hrs".to_string();

        let selected = filter.select(list).await;

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].text, "fresh news");
        assert_eq!(records.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reset_clears_run_state() {
        let mut filter = filter(
            Arc::new(FakeRecords::default()),
            Arc::new(FakeOracle::default()),
            1,
        );
        assert!(filter.accept(&CandidateKeyword::new("eclipse")).await);
        assert!(filter.is_full());

        filter.reset(3);

        assert!(!filter.is_full());
        assert!(filter.accepted().is_empty());
        assert!(filter.accept(&CandidateKeyword::new("eclipse")).await);
    }

    #[tokio::test]
    async fn test_in_run_substring_duplicate_is_rejected() {
        let oracle = Arc::new(FakeOracle::default());
        let mut filter = filter(Arc::new(FakeRecords::default()), oracle.clone(), 5);

        assert!(filter.accept(&CandidateKeyword::new("Super Bowl")).await);
        assert!(!filter.accept(&CandidateKeyword::new("super bowl halftime")).await);
        assert!(oracle.calls().is_empty());
    }

    #[test]
    fn test_contains_either() {
        assert!(contains_either("Taylor Swift", "taylor swift tour"));
        assert!(contains_either("TAYLOR SWIFT TOUR", "taylor swift"));
        assert!(!contains_either("eclipse", "election"));
    }
}
