//! Color-correction stage (PHOTOS_UPLOADED -> COLOR_CORRECTED).
//!
//! Local photos go through the [`ImageEnhancer`]; remote photos can't be
//! edited in place, so they get a written critique from the [`VisionClient`]
//! instead.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{
    Adjustments, AgentError, AgentLogEntry, PhotoCorrectionResult, PhotoRef, Stage, Task,
    TaskStatus, TaskUpdate,
};
use crate::ports::{COLOR_CRITIQUE_INSTRUCTION, Clock, ImageEnhancer, TaskStore, VisionClient};

use super::{Agent, AgentOutcome, commit_stage};

pub const AGENT_NAME: &str = "color_correct_agent_2a";
pub const ACTION: &str = "color_correction_completed";

pub struct ColorCorrectAgent {
    store: Arc<dyn TaskStore>,
    enhancer: Arc<dyn ImageEnhancer>,
    vision: Option<Arc<dyn VisionClient>>,
    clock: Arc<dyn Clock>,
    adjustments: Adjustments,
}

impl ColorCorrectAgent {
    pub fn new(
        store: Arc<dyn TaskStore>,
        enhancer: Arc<dyn ImageEnhancer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            enhancer,
            vision: None,
            clock,
            adjustments: Adjustments::default(),
        }
    }

    /// Without a vision client every remote photo fails individually.
    pub fn with_vision(mut self, vision: Arc<dyn VisionClient>) -> Self {
        self.vision = Some(vision);
        self
    }

    pub fn with_adjustments(mut self, adjustments: Adjustments) -> Self {
        self.adjustments = adjustments;
        self
    }

    async fn correct_one(
        &self,
        task: &Task,
        photo_index: usize,
        reference: &str,
    ) -> PhotoCorrectionResult {
        match PhotoRef::parse(reference) {
            PhotoRef::LocalFile { path } => {
                match self.enhancer.enhance(&path, &self.adjustments).await {
                    Ok(corrected) => {
                        info!(
                            task_id = %task.id,
                            photo_index,
                            corrected = %corrected.display(),
                            "photo corrected"
                        );
                        PhotoCorrectionResult::corrected(
                            photo_index,
                            path,
                            corrected,
                            self.adjustments,
                        )
                    }
                    Err(e) => {
                        warn!(task_id = %task.id, photo_index, error = %e, "correction failed");
                        PhotoCorrectionResult::failed(
                            photo_index,
                            PhotoRef::LocalFile { path },
                            e.to_string(),
                        )
                    }
                }
            }
            PhotoRef::RemoteUrl { url } => {
                let Some(vision) = &self.vision else {
                    warn!(task_id = %task.id, photo_index, "no vision client for remote photo");
                    return PhotoCorrectionResult::failed(
                        photo_index,
                        PhotoRef::RemoteUrl { url },
                        "vision client not configured",
                    );
                };
                match vision.analyze(&url, COLOR_CRITIQUE_INSTRUCTION).await {
                    Ok(analysis) => {
                        info!(
                            task_id = %task.id,
                            photo_index,
                            model = %analysis.model,
                            "remote photo analyzed"
                        );
                        PhotoCorrectionResult::analyzed(
                            photo_index,
                            url,
                            analysis.text,
                            analysis.model,
                        )
                    }
                    Err(e) => {
                        warn!(task_id = %task.id, photo_index, error = %e, "vision failed");
                        PhotoCorrectionResult::failed(
                            photo_index,
                            PhotoRef::RemoteUrl { url },
                            e.to_string(),
                        )
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Agent for ColorCorrectAgent {
    fn name(&self) -> &'static str {
        AGENT_NAME
    }

    fn stage(&self) -> Stage {
        Stage::ColorCorrection
    }

    async fn execute(&self, task: &Task) -> Result<AgentOutcome, AgentError> {
        let photos = &task.metadata.photo_urls;
        info!(
            task_id = %task.id,
            sku = %task.sku_code,
            photos = photos.len(),
            "starting color correction"
        );

        // sequential on purpose: entry n must describe photo n
        let mut results = Vec::with_capacity(photos.len());
        for (idx, reference) in photos.iter().enumerate() {
            results.push(self.correct_one(task, idx + 1, reference).await);
        }

        let completed = results.iter().filter(|r| r.is_completed()).count();
        let entry = AgentLogEntry::new(
            self.clock.now(),
            AGENT_NAME,
            ACTION,
            format!("Processed {} photos for color correction", results.len()),
        );
        let update = TaskUpdate::new()
            .transition(TaskStatus::ColorCorrected)
            .set_color_analysis(results)
            .push_log(entry);

        let outcome = commit_stage(self.store.as_ref(), task, update).await?;
        if let AgentOutcome::Committed { .. } = outcome {
            info!(task_id = %task.id, completed, total = photos.len(), "task is COLOR_CORRECTED");
        }
        Ok(outcome)
    }
}
