//! TaskStore port - the source of truth for task documents.
//!
//! The store owns:
//! - task documents (status, results, audit log, retry bookkeeping)
//! - the change feed announcing inserts and updates
//!
//! # Design rules
//! - Every write is one atomic single-document update (set + append + increment).
//! - Every committed write produces exactly one change event.
//! - A change stream is single-use: once it yields an error or ends, open a new one.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::{
    ChangeEvent, ChangeFilter, StoreError, Task, TaskFilter, TaskId, TaskUpdate, UpdateResult,
};

/// Live change events. Yields `Err(StoreError::Connection)` at most once, then ends.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, StoreError>>;

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// The oldest task with this SKU, if any.
    async fn find_by_sku(&self, sku_code: &str) -> Result<Option<Task>, StoreError>;

    /// Insert a new document. Fails with `Duplicate` if the id is taken.
    async fn insert(&self, task: Task) -> Result<TaskId, StoreError>;

    /// Apply `update` to the document matching `filter`, all or nothing.
    async fn atomic_update(
        &self,
        filter: &TaskFilter,
        update: &TaskUpdate,
    ) -> Result<UpdateResult, StoreError>;

    /// Open a change subscription starting from "now".
    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeStream, StoreError>;
}
