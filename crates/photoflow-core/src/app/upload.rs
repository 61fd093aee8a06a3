//! Upload step: attach a local photo to the task for a SKU and hand the task
//! to the pipeline.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::domain::{AgentLogEntry, StoreError, Task, TaskFilter, TaskId, TaskStatus, TaskUpdate};
use crate::ports::{Clock, IdGenerator, TaskStore};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("could not resolve {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Re-uploading would move a task backwards.
    #[error("task for SKU {sku} is already {status}; refusing to add photos")]
    AlreadyProcessed { sku: String, status: TaskStatus },

    #[error("task {0} changed while uploading; try again")]
    Conflict(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub sku_code: String,
    pub file_path: PathBuf,
    pub product_name: String,
    pub country: String,
}

impl UploadRequest {
    pub fn new(sku_code: impl Into<String>, file_path: impl Into<PathBuf>) -> Self {
        Self {
            sku_code: sku_code.into(),
            file_path: file_path.into(),
            product_name: "UNKNOWN".to_string(),
            country: "US".to_string(),
        }
    }

    pub fn product_name(mut self, product_name: impl Into<String>) -> Self {
        self.product_name = product_name.into();
        self
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadReceipt {
    pub task_id: TaskId,
    /// A new task was created for this SKU.
    pub created: bool,
    pub photo_path: PathBuf,
    pub task: Task,
}

async fn resolve(path: &Path) -> Result<PathBuf, UploadError> {
    match tokio::fs::canonicalize(path).await {
        Ok(p) => Ok(p),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(UploadError::FileNotFound(path.to_path_buf()))
        }
        Err(source) => Err(UploadError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Find (or create) the task for `request.sku_code`, append the photo's
/// absolute path and set `PHOTOS_UPLOADED`, all in one update.
pub async fn upload_photo(
    store: &dyn TaskStore,
    ids: &dyn IdGenerator,
    clock: &dyn Clock,
    request: UploadRequest,
) -> Result<UploadReceipt, UploadError> {
    let photo_path = resolve(&request.file_path).await?;

    let (task, created) = match store.find_by_sku(&request.sku_code).await? {
        Some(task) => {
            info!(task_id = %task.id, sku = %request.sku_code, "found existing task");
            (task, false)
        }
        None => {
            let task = Task::new(
                ids.generate_task_id(),
                &request.sku_code,
                &request.product_name,
                &request.country,
                clock.now(),
            );
            store.insert(task.clone()).await?;
            info!(task_id = %task.id, sku = %request.sku_code, "created task");
            (task, true)
        }
    };

    if !matches!(task.status, TaskStatus::Initiated | TaskStatus::PhotosUploaded) {
        return Err(UploadError::AlreadyProcessed {
            sku: request.sku_code,
            status: task.status,
        });
    }

    let file_name = photo_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let update = TaskUpdate::new()
        .transition(TaskStatus::PhotosUploaded)
        .push_photo_url(photo_path.to_string_lossy())
        .push_log(AgentLogEntry::new(
            clock.now(),
            Task::CREATOR,
            "photo_uploaded",
            format!("Uploaded photo: {file_name}"),
        ));

    let filter = TaskFilter::by_id(task.id).with_status(task.status);
    let updated = store
        .atomic_update(&filter, &update)
        .await?
        .task
        .ok_or(UploadError::Conflict(task.id))?;

    info!(
        task_id = %updated.id,
        photos = updated.metadata.photo_urls.len(),
        "task is PHOTOS_UPLOADED"
    );
    Ok(UploadReceipt {
        task_id: updated.id,
        created,
        photo_path,
        task: updated,
    })
}
