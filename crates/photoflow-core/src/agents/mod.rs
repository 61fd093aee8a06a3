//! Agents - one stage of the pipeline each.
//!
//! An agent receives a freshly read task whose status triggers its stage,
//! does the stage's work photo by photo, and commits everything (results,
//! next status, audit entry) in a single status-guarded update.
//!
//! Per-photo failures are data: they land in the result array and the run
//! still commits. Only a failure that prevents the commit itself comes back
//! as an [`AgentError`].

pub mod color_correct;
pub mod publish;
pub mod registry;

use async_trait::async_trait;

use crate::domain::{AgentError, Stage, Task, TaskFilter, TaskStatus, TaskUpdate};
use crate::ports::TaskStore;

pub use self::color_correct::ColorCorrectAgent;
pub use self::publish::PublishAgent;
pub use self::registry::{AgentRegistry, RegistryError};

/// What an agent run ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentOutcome {
    /// The stage's results were written and the task moved to `next_status`.
    Committed { next_status: TaskStatus },
    /// Someone else moved the task first; nothing was written.
    Superseded,
}

#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable name; used as the audit entry's `agent` field.
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage;

    fn applies_to(&self, status: TaskStatus) -> bool {
        status.stage() == Some(self.stage())
    }

    async fn execute(&self, task: &Task) -> Result<AgentOutcome, AgentError>;
}

/// Commit a stage's update only if the task still has the status the agent read.
///
/// A lost race is not an error: the winner already did (or is doing) the work.
pub(crate) async fn commit_stage(
    store: &dyn TaskStore,
    task: &Task,
    update: TaskUpdate,
) -> Result<AgentOutcome, AgentError> {
    let next_status = update
        .status()
        .ok_or_else(|| AgentError::Other("stage update without a status transition".into()))?;
    if !task.status.can_advance_to(next_status) {
        return Err(AgentError::Other(format!(
            "illegal transition {} -> {next_status}",
            task.status
        )));
    }

    let filter = TaskFilter::by_id(task.id).with_status(task.status);
    let result = store.atomic_update(&filter, &update).await?;

    if result.matched() {
        Ok(AgentOutcome::Committed { next_status })
    } else {
        tracing::info!(
            task_id = %task.id,
            expected = %task.status,
            "task moved on before commit; dropping stage results"
        );
        Ok(AgentOutcome::Superseded)
    }
}
