//! MediaPublisher port - uploads a finished photo to the shop's media library.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub media_id: u64,
    pub media_url: String,
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("could not read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upload request failed: {0}")]
    Transport(String),

    /// The endpoint answered with a non-success status.
    #[error("upload rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected upload response: {0}")]
    InvalidResponse(String),
}

impl PublishError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            PublishError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[async_trait]
pub trait MediaPublisher: Send + Sync {
    async fn upload(&self, file_path: &Path, filename: &str)
    -> Result<UploadedMedia, PublishError>;
}
