//! Per-photo result records written by the agents.
//!
//! Both result arrays are parallel to `metadata.photo_urls` by position:
//! entry `n` always describes photo `n`, whatever happened to its neighbours.
//! `photo_index` is 1-based.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Where a photo reference points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhotoRef {
    LocalFile { path: PathBuf },
    RemoteUrl { url: String },
}

impl PhotoRef {
    /// Absolute paths and `file://` URLs are local; anything else is remote.
    pub fn parse(reference: &str) -> Self {
        if let Some(path) = reference.strip_prefix("file://") {
            PhotoRef::LocalFile {
                path: PathBuf::from(path),
            }
        } else if reference.starts_with('/') {
            PhotoRef::LocalFile {
                path: PathBuf::from(reference),
            }
        } else {
            PhotoRef::RemoteUrl {
                url: reference.to_string(),
            }
        }
    }
}

/// Enhancement factors. `1.0` leaves the image unchanged for that channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Adjustments {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub sharpness: f32,
}

impl Default for Adjustments {
    fn default() -> Self {
        Self {
            brightness: 1.05,
            contrast: 1.1,
            saturation: 1.15,
            sharpness: 1.2,
        }
    }
}

impl Adjustments {
    /// e.g. "brightness +5%, contrast +10%, saturation +15%, sharpness +20%"
    pub fn describe(&self) -> String {
        let pct = |factor: f32| {
            let delta = ((factor - 1.0) * 100.0).round() as i32;
            if delta >= 0 {
                format!("+{delta}%")
            } else {
                format!("{delta}%")
            }
        };
        format!(
            "brightness {}, contrast {}, saturation {}, sharpness {}",
            pct(self.brightness),
            pct(self.contrast),
            pct(self.saturation),
            pct(self.sharpness)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionStatus {
    Completed,
    Failed,
}

/// One entry of `color_analysis`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoCorrectionResult {
    pub photo_index: usize,
    pub photo: PhotoRef,
    pub status: CorrectionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjustments: Option<Adjustments>,

    /// Human-readable summary (local) or raw vision model output (remote).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhotoCorrectionResult {
    pub fn corrected(
        photo_index: usize,
        source: PathBuf,
        corrected_path: PathBuf,
        adjustments: Adjustments,
    ) -> Self {
        Self {
            photo_index,
            photo: PhotoRef::LocalFile { path: source },
            status: CorrectionStatus::Completed,
            corrected_path: Some(corrected_path),
            adjustments: Some(adjustments),
            analysis: Some(format!(
                "Applied color corrections: {}",
                adjustments.describe()
            )),
            model_used: None,
            error: None,
        }
    }

    pub fn analyzed(
        photo_index: usize,
        url: String,
        analysis: String,
        model_used: impl Into<String>,
    ) -> Self {
        Self {
            photo_index,
            photo: PhotoRef::RemoteUrl { url },
            status: CorrectionStatus::Completed,
            corrected_path: None,
            adjustments: None,
            analysis: Some(analysis),
            model_used: Some(model_used.into()),
            error: None,
        }
    }

    pub fn failed(photo_index: usize, photo: PhotoRef, error: impl Into<String>) -> Self {
        Self {
            photo_index,
            photo,
            status: CorrectionStatus::Failed,
            corrected_path: None,
            adjustments: None,
            analysis: None,
            model_used: None,
            error: Some(error.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == CorrectionStatus::Completed
    }

    pub fn corrected_path(&self) -> Option<&Path> {
        self.corrected_path.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Published,
    Failed,
    Skipped,
}

/// One entry of `wordpress_publish_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoPublishResult {
    pub photo_index: usize,
    pub status: PublishStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,

    /// HTTP status of a rejected upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    /// Why nothing was attempted (skipped, missing file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Why an attempted upload failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhotoPublishResult {
    fn empty(photo_index: usize, status: PublishStatus) -> Self {
        Self {
            photo_index,
            status,
            media_id: None,
            media_url: None,
            file_path: None,
            status_code: None,
            reason: None,
            error: None,
        }
    }

    pub fn published(
        photo_index: usize,
        media_id: u64,
        media_url: String,
        file_path: PathBuf,
    ) -> Self {
        Self {
            media_id: Some(media_id),
            media_url: Some(media_url),
            file_path: Some(file_path),
            ..Self::empty(photo_index, PublishStatus::Published)
        }
    }

    pub fn skipped(photo_index: usize, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::empty(photo_index, PublishStatus::Skipped)
        }
    }

    /// Nothing was uploaded because there was nothing usable to upload.
    pub fn unavailable(photo_index: usize, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::empty(photo_index, PublishStatus::Failed)
        }
    }

    pub fn failed(photo_index: usize, error: impl Into<String>, status_code: Option<u16>) -> Self {
        Self {
            error: Some(error.into()),
            status_code,
            ..Self::empty(photo_index, PublishStatus::Failed)
        }
    }

    pub fn is_published(&self) -> bool {
        self.status == PublishStatus::Published
    }
}
