//! The JSON bundle archive.
//!
//! [`JsonArchive`] is both the pipeline's default [`ArticleSink`] and its
//! [`RecentRecords`] lookup: keywords count as recently covered when a bundle
//! for them was harvested within the trailing window.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument, warn};

use super::ArticleSink;
use super::json::write_bundle;
use crate::dedup::{RecentRecords, contains_either};
use crate::models::{BoxError, KeywordBundle};

#[derive(Debug, Clone)]
pub struct JsonArchive {
    root: PathBuf,
}

impl JsonArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Bundles harvested at or after `cutoff`.
    ///
    /// Date directories older than the cutoff's local date are not opened.
    /// Unreadable or malformed files are logged and skipped.
    #[instrument(level = "debug", skip(self))]
    pub async fn bundles_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<KeywordBundle>, BoxError> {
        let mut bundles = Vec::new();
        let oldest_day = cutoff.with_timezone(&Local).date_naive();

        let mut days = match fs::read_dir(&self.root).await {
            Ok(days) => days,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(bundles),
            Err(e) => return Err(e.into()),
        };

        while let Some(day) = days.next_entry().await? {
            let Some(date) = day
                .file_name()
                .to_str()
                .and_then(|name| NaiveDate::parse_from_str(name, "%Y-%m-%d").ok())
            else {
                continue;
            };
            if date < oldest_day || !day.file_type().await?.is_dir() {
                continue;
            }

            let mut files = fs::read_dir(day.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                match read_bundle(&path).await {
                    Ok(bundle) if bundle.harvested_at >= cutoff => bundles.push(bundle),
                    Ok(_) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable bundle"),
                }
            }
        }

        debug!(count = bundles.len(), "Loaded recent bundles");
        Ok(bundles)
    }

    async fn keywords_within(&self, window_hours: u32) -> Result<Vec<String>, BoxError> {
        let cutoff = Utc::now() - Duration::hours(i64::from(window_hours));
        let mut keywords: Vec<String> = self
            .bundles_since(cutoff)
            .await?
            .into_iter()
            .map(|b| b.keyword)
            .collect();
        keywords.sort();
        keywords.dedup();
        Ok(keywords)
    }
}

async fn read_bundle(path: &Path) -> Result<KeywordBundle, BoxError> {
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

#[async_trait]
impl ArticleSink for JsonArchive {
    async fn deliver(&self, bundle: &KeywordBundle) -> Result<(), BoxError> {
        write_bundle(bundle, &self.root).await.map(|_| ())
    }
}

#[async_trait]
impl RecentRecords for JsonArchive {
    async fn exists_similar(&self, keyword: &str, window_hours: u32) -> Result<bool, BoxError> {
        let keywords = self.keywords_within(window_hours).await?;
        Ok(keywords.iter().any(|k| contains_either(k, keyword)))
    }

    async fn recent_keywords(&self, window_hours: u32) -> Result<Vec<String>, BoxError> {
        self.keywords_within(window_hours).await
    }
}
