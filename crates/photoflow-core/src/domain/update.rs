//! Atomic single-document updates.
//!
//! A [`TaskUpdate`] bundles every field a writer wants to change: `set`
//! fields, `append` to arrays, and counter increments. Stores apply it in one
//! step so readers never see a half-written task. A [`TaskFilter`] optionally
//! pins the status the writer read, turning the update into a compare-and-set.

use super::{AgentLogEntry, PhotoCorrectionResult, PhotoPublishResult, Task, TaskId, TaskStatus};

/// Which document an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskFilter {
    pub id: TaskId,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn by_id(id: TaskId) -> Self {
        Self { id, status: None }
    }

    /// Match only while the task still has `status`.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        task.id == self.id && self.status.is_none_or(|s| s == task.status)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    status: Option<TaskStatus>,
    color_analysis: Option<Vec<PhotoCorrectionResult>>,
    wordpress_publish_results: Option<Vec<PhotoPublishResult>>,
    last_error: Option<String>,
    push_photo_urls: Vec<String>,
    push_agent_log: Vec<AgentLogEntry>,
    inc_retry_count: u32,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `status` and the `workflow_step` that goes with it.
    pub fn transition(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn set_color_analysis(mut self, results: Vec<PhotoCorrectionResult>) -> Self {
        self.color_analysis = Some(results);
        self
    }

    pub fn set_publish_results(mut self, results: Vec<PhotoPublishResult>) -> Self {
        self.wordpress_publish_results = Some(results);
        self
    }

    pub fn push_photo_url(mut self, url: impl Into<String>) -> Self {
        self.push_photo_urls.push(url.into());
        self
    }

    pub fn push_log(mut self, entry: AgentLogEntry) -> Self {
        self.push_agent_log.push(entry);
        self
    }

    /// Batch-failure bookkeeping: bump the retry counter, overwrite the error.
    pub fn record_failure(mut self, error: impl Into<String>) -> Self {
        self.inc_retry_count += 1;
        self.last_error = Some(error.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn status(&self) -> Option<TaskStatus> {
        self.status
    }

    /// Top-level field names this update touches, in document order.
    pub fn updated_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        if self.status.is_some() {
            fields.push("status");
            fields.push("workflow_step");
        }
        if !self.push_photo_urls.is_empty() {
            fields.push("metadata.photo_urls");
        }
        if self.color_analysis.is_some() {
            fields.push("color_analysis");
        }
        if self.wordpress_publish_results.is_some() {
            fields.push("wordpress_publish_results");
        }
        if !self.push_agent_log.is_empty() {
            fields.push("agent_log");
        }
        if self.inc_retry_count > 0 || self.last_error.is_some() {
            fields.push("retry_metadata");
        }
        fields.into_iter().map(str::to_string).collect()
    }

    /// Apply to an in-memory document. Stores call this under their own lock
    /// or transaction so the whole update lands at once.
    pub fn apply(&self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
            task.workflow_step = status.workflow_step();
        }
        if let Some(results) = &self.color_analysis {
            task.color_analysis = results.clone();
        }
        if let Some(results) = &self.wordpress_publish_results {
            task.wordpress_publish_results = results.clone();
        }
        task.metadata
            .photo_urls
            .extend(self.push_photo_urls.iter().cloned());
        task.agent_log.extend(self.push_agent_log.iter().cloned());
        task.retry_metadata.count += self.inc_retry_count;
        if let Some(error) = &self.last_error {
            task.retry_metadata.last_error = Some(error.clone());
        }
    }
}

/// What an update did.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    /// The document after the update, or `None` when the filter matched nothing.
    pub task: Option<Task>,
}

impl UpdateResult {
    pub fn matched(&self) -> bool {
        self.task.is_some()
    }
}
