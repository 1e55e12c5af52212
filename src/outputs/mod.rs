//! Hand-off of harvested articles to downstream stages.
//!
//! # Submodules
//!
//! - [`json`]: writes one [`KeywordBundle`] per accepted keyword as JSON
//! - [`archive`]: [`archive::JsonArchive`], which both receives bundles and
//!   answers recency lookups over what it has stored
//!
//! # Output Structure
//!
//! ```text
//! json_output_dir/
//! ├── 2025-05-06/
//! │   ├── solar-eclipse-081502.json
//! │   └── world-cup-final-101733.json
//! └── 2025-05-07/
//!     └── ...
//! ```

pub mod archive;
pub mod json;

use async_trait::async_trait;

use crate::models::{BoxError, KeywordBundle};

/// A downstream consumer of validated article bundles.
#[async_trait]
pub trait ArticleSink: Send + Sync {
    async fn deliver(&self, bundle: &KeywordBundle) -> Result<(), BoxError>;
}
