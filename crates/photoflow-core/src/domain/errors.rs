//! Error types and their operational classification.
//!
//! Every failure the pipeline can see maps onto one [`ErrorKind`], and the kind
//! alone decides what happens next: reconnect, skip the event, or record the
//! failure on the task and keep going.

use thiserror::Error;

use super::{Stage, TaskId};

/// ErrorKind classifies failures by how the loop reacts to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The change feed (or the store behind it) is unreachable. Reconnect with backoff.
    Connection,
    /// An event without a task id. Skip.
    MalformedEvent,
    /// The task was deleted between the event and the read. Skip.
    MissingTask,
    /// One photo failed. Recorded inline in the result array.
    Item,
    /// A whole agent run failed. Status untouched, retry bookkeeping recorded.
    Batch,
}

/// Task store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("task {0} already exists")]
    Duplicate(TaskId),

    #[error("task document could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_connection(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }
}

/// A batch-level agent failure. Per-photo problems never surface here.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("task store: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Other(String),
}

/// Errors surfaced by one turn of the listen/dispatch loop.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("change feed connection lost: {0}")]
    ConnectionLost(String),

    #[error("change event has no task id")]
    MalformedEvent,

    #[error("task {0} not found (deleted concurrently?)")]
    MissingTask(TaskId),

    #[error("{stage} agent '{agent}' failed on {task_id}: {source}")]
    AgentFailed {
        agent: &'static str,
        stage: Stage,
        task_id: TaskId,
        /// `retry_metadata.count` after bookkeeping, if the bookkeeping write landed.
        attempts: Option<u32>,
        #[source]
        source: AgentError,
    },

    #[error("task store: {0}")]
    Store(StoreError),

    #[error("gave up reconnecting to the task store after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::ConnectionLost(_) | PipelineError::ReconnectExhausted { .. } => {
                ErrorKind::Connection
            }
            PipelineError::MalformedEvent => ErrorKind::MalformedEvent,
            PipelineError::MissingTask(_) => ErrorKind::MissingTask,
            PipelineError::AgentFailed { .. } => ErrorKind::Batch,
            PipelineError::Store(e) if e.is_connection() => ErrorKind::Connection,
            PipelineError::Store(_) => ErrorKind::Batch,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::ReconnectExhausted { .. })
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(reason) => PipelineError::ConnectionLost(reason),
            other => PipelineError::Store(other),
        }
    }
}
