//! Publish stage (COLOR_CORRECTED -> WORDPRESS_PUBLISHED | PUBLISH_FAILED).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{
    AgentError, AgentLogEntry, PhotoCorrectionResult, PhotoPublishResult, Stage, Task, TaskStatus,
    TaskUpdate,
};
use crate::ports::{Clock, MediaPublisher, TaskStore};

use super::{Agent, AgentOutcome, commit_stage};

pub const AGENT_NAME: &str = "wordpress_publish_agent_2b";
pub const ACTION: &str = "wordpress_publish_completed";

pub const NOT_CONFIGURED: &str = "WordPress credentials not fully configured";
pub const IMAGE_NOT_FOUND: &str = "Corrected image not found";

pub struct PublishAgent {
    store: Arc<dyn TaskStore>,
    publisher: Option<Arc<dyn MediaPublisher>>,
    clock: Arc<dyn Clock>,
}

impl PublishAgent {
    /// `publisher = None` means credentials are missing: every entry is skipped.
    pub fn new(
        store: Arc<dyn TaskStore>,
        publisher: Option<Arc<dyn MediaPublisher>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
        }
    }

    async fn publish_one(
        &self,
        task: &Task,
        publisher: &dyn MediaPublisher,
        entry: &PhotoCorrectionResult,
    ) -> PhotoPublishResult {
        let idx = entry.photo_index;
        let path = match entry.corrected_path() {
            Some(p) if tokio::fs::try_exists(p).await.unwrap_or(false) => p,
            _ => {
                warn!(task_id = %task.id, photo_index = idx, "no corrected file to publish");
                return PhotoPublishResult::unavailable(idx, IMAGE_NOT_FOUND);
            }
        };

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}_{idx}.jpg", task.sku_code));

        match publisher.upload(path, &filename).await {
            Ok(media) => {
                info!(
                    task_id = %task.id,
                    photo_index = idx,
                    media_id = media.media_id,
                    "photo published"
                );
                PhotoPublishResult::published(
                    idx,
                    media.media_id,
                    media.media_url,
                    path.to_path_buf(),
                )
            }
            Err(e) => {
                warn!(task_id = %task.id, photo_index = idx, error = %e, "upload failed");
                PhotoPublishResult::failed(idx, e.to_string(), e.status_code())
            }
        }
    }
}

#[async_trait]
impl Agent for PublishAgent {
    fn name(&self) -> &'static str {
        AGENT_NAME
    }

    fn stage(&self) -> Stage {
        Stage::Publish
    }

    async fn execute(&self, task: &Task) -> Result<AgentOutcome, AgentError> {
        info!(
            task_id = %task.id,
            sku = %task.sku_code,
            entries = task.color_analysis.len(),
            "starting publish"
        );

        let mut results = Vec::with_capacity(task.color_analysis.len());
        match &self.publisher {
            None => {
                warn!(task_id = %task.id, "{NOT_CONFIGURED}; skipping every photo");
                for entry in &task.color_analysis {
                    results.push(PhotoPublishResult::skipped(entry.photo_index, NOT_CONFIGURED));
                }
            }
            Some(publisher) => {
                for entry in &task.color_analysis {
                    results.push(self.publish_one(task, publisher.as_ref(), entry).await);
                }
            }
        }

        let published = results.iter().filter(|r| r.is_published()).count();
        let next_status = if published > 0 {
            TaskStatus::WordpressPublished
        } else {
            TaskStatus::PublishFailed
        };

        let entry = AgentLogEntry::new(
            self.clock.now(),
            AGENT_NAME,
            ACTION,
            format!("Published {published} photos to WordPress"),
        );
        let update = TaskUpdate::new()
            .transition(next_status)
            .set_publish_results(results)
            .push_log(entry);

        let outcome = commit_stage(self.store.as_ref(), task, update).await?;
        if let AgentOutcome::Committed { next_status } = outcome {
            info!(task_id = %task.id, published, status = %next_status, "publish finished");
        }
        Ok(outcome)
    }
}
