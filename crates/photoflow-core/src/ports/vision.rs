//! VisionClient port - remote image critique.

use async_trait::async_trait;
use thiserror::Error;

/// Instruction sent with every remote photo.
pub const COLOR_CRITIQUE_INSTRUCTION: &str = "Analyze this product photo for color correction. \
Provide: 1) Current color assessment, 2) Suggested color adjustments for e-commerce, \
3) Overall quality rating. Be concise.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisionAnalysis {
    pub text: String,
    pub model: String,
}

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("vision request failed: {0}")]
    Transport(String),

    #[error("vision API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("vision API response had no text content")]
    EmptyResponse,
}

#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn analyze(&self, image_url: &str, instruction: &str)
    -> Result<VisionAnalysis, VisionError>;
}
