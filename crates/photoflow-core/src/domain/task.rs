//! The Task document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PhotoCorrectionResult, PhotoPublishResult, TaskId, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMetadata {
    pub product_name: String,
    pub country: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Ordered photo references: absolute paths, `file://` URLs or remote URLs.
    #[serde(default)]
    pub photo_urls: Vec<String>,
}

/// One audit-trail line. `agent_log` only ever grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLogEntry {
    pub timestamp: DateTime<Utc>,
    pub agent: String,
    pub action: String,
    pub note: String,
}

impl AgentLogEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        agent: impl Into<String>,
        action: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            agent: agent.into(),
            action: action.into(),
            note: note.into(),
        }
    }
}

/// Batch-level failure bookkeeping. Never reset automatically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryMetadata {
    pub count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub sku_code: String,
    pub status: TaskStatus,
    pub workflow_step: u32,
    pub metadata: TaskMetadata,

    #[serde(default)]
    pub color_analysis: Vec<PhotoCorrectionResult>,

    #[serde(default)]
    pub wordpress_publish_results: Vec<PhotoPublishResult>,

    #[serde(default)]
    pub agent_log: Vec<AgentLogEntry>,

    #[serde(default)]
    pub retry_metadata: RetryMetadata,
}

impl Task {
    pub const CREATOR: &'static str = "upload_photo";

    /// A fresh `INITIATED` task with no photos and one `task_created` audit entry.
    pub fn new(
        id: TaskId,
        sku_code: impl Into<String>,
        product_name: impl Into<String>,
        country: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let sku_code = sku_code.into();
        let created = AgentLogEntry::new(
            now,
            Self::CREATOR,
            "task_created",
            format!("Created task for SKU {sku_code}"),
        );
        Self {
            id,
            sku_code,
            status: TaskStatus::Initiated,
            workflow_step: TaskStatus::Initiated.workflow_step(),
            metadata: TaskMetadata {
                product_name: product_name.into(),
                country: country.into(),
                title: None,
                photo_urls: Vec::new(),
            },
            color_analysis: Vec::new(),
            wordpress_publish_results: Vec::new(),
            agent_log: vec![created],
            retry_metadata: RetryMetadata::default(),
        }
    }

    pub fn with_photos(mut self, photo_urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.metadata
            .photo_urls
            .extend(photo_urls.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    #[test]
    fn new_task_starts_initiated_with_one_audit_entry() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let task = Task::new(TaskId::from_ulid(Ulid::new()), "NIKE-USA-101", "Shoe", "US", now);

        assert_eq!(task.status, TaskStatus::Initiated);
        assert_eq!(task.workflow_step, 1);
        assert!(task.metadata.photo_urls.is_empty());
        assert_eq!(task.agent_log.len(), 1);
        assert_eq!(task.agent_log[0].action, "task_created");
        assert_eq!(task.retry_metadata, RetryMetadata::default());
    }

    #[test]
    fn document_without_result_arrays_still_decodes() {
        let id = TaskId::from_ulid(Ulid::new());
        let doc = serde_json::json!({
            "id": id,
            "sku_code": "TEST-SKU-001",
            "status": "PHOTOS_UPLOADED",
            "workflow_step": 1,
            "metadata": {
                "product_name": "Test Product",
                "country": "US",
                "photo_urls": ["https://example.com/photo1.jpg"]
            }
        });

        let task: Task = serde_json::from_value(doc).unwrap();
        assert_eq!(task.status, TaskStatus::PhotosUploaded);
        assert!(task.color_analysis.is_empty());
        assert!(task.agent_log.is_empty());
        assert_eq!(task.retry_metadata.count, 0);
    }
}
