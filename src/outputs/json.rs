//! JSON output for downstream consumers.
//!
//! Bundles are grouped by the local date they were harvested on and named
//! after their keyword plus the local harvest time, so repeated runs on the
//! same day never overwrite each other. Two bundles that land on the same
//! name within one second get a numeric suffix instead:
//!
//! ```text
//! json_output_dir/
//! └── 2025-05-06/
//!     ├── covid-19-081502.json
//!     ├── covid-19-081502-1.json
//!     └── solar-eclipse-141733.json
//! ```

use chrono::Local;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument};

use crate::models::{BoxError, KeywordBundle};
use crate::utils::slugify;

/// Path a bundle is written to under `json_output_dir`.
pub fn bundle_path(bundle: &KeywordBundle, json_output_dir: &Path) -> PathBuf {
    let local = bundle.harvested_at.with_timezone(&Local);
    let mut slug = slugify(&bundle.keyword);
    if slug.is_empty() {
        slug = "keyword".to_string();
    }
    json_output_dir
        .join(local.date_naive().to_string())
        .join(format!("{}-{}.json", slug, local.format("%H%M%S")))
}

/// `base` with `-{n}` inserted before the extension.
fn suffixed_path(base: &Path, n: u32) -> PathBuf {
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("keyword");
    base.with_file_name(format!("{stem}-{n}.json"))
}

/// Write a [`KeywordBundle`] as pretty JSON, creating the date directory.
///
/// Files are created exclusively; an existing bundle is never replaced.
///
/// # Returns
///
/// The path written, or an error if directory creation, serialization or
/// the write fails.
#[instrument(level = "info", skip_all, fields(keyword = %bundle.keyword, json_output_dir = %json_output_dir.display()))]
pub async fn write_bundle(bundle: &KeywordBundle, json_output_dir: &Path) -> Result<PathBuf, BoxError> {
    let json = serde_json::to_string_pretty(bundle)?;
    let path = bundle_path(bundle, json_output_dir);

    if let Some(dir) = path.parent() {
        if let Err(e) = fs::create_dir_all(dir).await {
            error!(dir = %dir.display(), error = %e, "Failed to create JSON dir");
            return Err(e.into());
        }
    }

    let mut candidate = path.clone();
    let mut n = 0u32;
    let mut file = loop {
        match OpenOptions::new().write(true).create_new(true).open(&candidate).await {
            Ok(file) => break file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                n += 1;
                debug!(taken = %candidate.display(), "Bundle name in use; adding suffix");
                candidate = suffixed_path(&path, n);
            }
            Err(e) => return Err(e.into()),
        }
    };
    file.write_all(json.as_bytes()).await?;
    file.flush().await?;

    info!(path = %candidate.display(), articles = bundle.articles.len(), "Wrote keyword bundle");
    Ok(candidate)
}
