//! ImageEnhancer port - pixel-level color correction of a local file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Adjustments;

#[derive(Debug, Error)]
pub enum EnhanceError {
    #[error("image file not found: {0}")]
    NotFound(PathBuf),

    #[error("could not decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("could not write {path}: {reason}")]
    Encode { path: PathBuf, reason: String },

    #[error("enhancement worker stopped: {0}")]
    Worker(String),
}

#[async_trait]
pub trait ImageEnhancer: Send + Sync {
    /// Write a corrected copy beside `source` and return its path.
    async fn enhance(&self, source: &Path, adjustments: &Adjustments)
    -> Result<PathBuf, EnhanceError>;
}

/// `/a/b/shoe.png` -> `/a/b/shoe_color_corrected.jpg`
pub fn corrected_path_for(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo".to_string());
    source.with_file_name(format!("{stem}_color_corrected.jpg"))
}
