//! Change-feed events.
//!
//! An event only says *that* a task changed. Consumers must re-read the task
//! before acting; `updated_fields` is for logging.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Update,
    Replace,
    /// Not emitted by stores; scheduled by the supervisor after a batch failure.
    Retry,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Replace => "replace",
            OperationKind::Retry => "retry",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(OperationKind::Insert),
            "update" => Ok(OperationKind::Update),
            "replace" => Ok(OperationKind::Replace),
            "retry" => Ok(OperationKind::Retry),
            other => Err(format!("unknown operation '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Absent on malformed events; the dispatcher skips those.
    pub task_id: Option<TaskId>,
    pub operation: OperationKind,
    #[serde(default)]
    pub updated_fields: Vec<String>,
}

impl ChangeEvent {
    pub fn new(task_id: TaskId, operation: OperationKind) -> Self {
        Self {
            task_id: Some(task_id),
            operation,
            updated_fields: Vec::new(),
        }
    }

    pub fn insert(task_id: TaskId) -> Self {
        Self::new(task_id, OperationKind::Insert)
    }

    pub fn update(task_id: TaskId, updated_fields: Vec<String>) -> Self {
        Self {
            updated_fields,
            ..Self::new(task_id, OperationKind::Update)
        }
    }

    pub fn retry(task_id: TaskId) -> Self {
        Self::new(task_id, OperationKind::Retry)
    }

    /// An event that lost its document key somewhere upstream.
    pub fn without_task(operation: OperationKind) -> Self {
        Self {
            task_id: None,
            operation,
            updated_fields: Vec::new(),
        }
    }
}

/// Which operations a subscription delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    operations: Vec<OperationKind>,
}

impl ChangeFilter {
    pub fn operations(operations: impl IntoIterator<Item = OperationKind>) -> Self {
        Self {
            operations: operations.into_iter().collect(),
        }
    }

    pub fn matches(&self, operation: OperationKind) -> bool {
        self.operations.contains(&operation)
    }
}

/// insert, update and replace.
impl Default for ChangeFilter {
    fn default() -> Self {
        Self::operations([
            OperationKind::Insert,
            OperationKind::Update,
            OperationKind::Replace,
        ])
    }
}
