//! Dispatcher - change event -> agent.
//!
//! Events are only hints. The dispatcher always re-reads the task and routes
//! on the status it finds *now*, so a duplicate or late event for a task that
//! has already moved on does nothing.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::agents::{AgentOutcome, AgentRegistry};
use crate::domain::{
    ChangeEvent, OperationKind, PipelineError, TaskFilter, TaskId, TaskStatus, TaskUpdate,
};
use crate::ports::TaskStore;

const RETRY_METADATA_FIELD: &str = "retry_metadata";

/// What one event led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// An update that only touched retry bookkeeping. Retries come from the
    /// supervisor's timer, never from the bookkeeping write itself.
    BookkeepingOnly { task_id: TaskId },
    /// The task's status triggers no stage (initial, terminal or unknown).
    NoAgent { task_id: TaskId, status: TaskStatus },
    /// An agent ran.
    Ran {
        task_id: TaskId,
        agent: &'static str,
        outcome: AgentOutcome,
    },
}

pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    registry: Arc<AgentRegistry>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<AgentRegistry>) -> Self {
        Self { store, registry }
    }

    /// Handle one change event.
    ///
    /// Never retries inline. A batch-level agent failure is recorded on the
    /// task (`retry_metadata.count += 1`, `last_error` overwritten, status
    /// untouched) and then returned as [`PipelineError::AgentFailed`].
    pub async fn on_event(&self, event: &ChangeEvent) -> Result<DispatchOutcome, PipelineError> {
        let Some(task_id) = event.task_id else {
            return Err(PipelineError::MalformedEvent);
        };

        debug!(
            %task_id,
            operation = %event.operation,
            updated_fields = ?event.updated_fields,
            "change detected"
        );

        if is_bookkeeping_only(event) {
            return Ok(DispatchOutcome::BookkeepingOnly { task_id });
        }

        let task = self
            .store
            .find_by_id(task_id)
            .await?
            .ok_or(PipelineError::MissingTask(task_id))?;

        let Some(agent) = self.registry.route(task.status) else {
            debug!(%task_id, status = %task.status, "no agent for status; skipping");
            return Ok(DispatchOutcome::NoAgent {
                task_id,
                status: task.status,
            });
        };

        info!(%task_id, status = %task.status, agent = agent.name(), "triggering agent");

        match agent.execute(&task).await {
            Ok(outcome) => Ok(DispatchOutcome::Ran {
                task_id,
                agent: agent.name(),
                outcome,
            }),
            Err(source) => {
                error!(
                    %task_id,
                    agent = agent.name(),
                    stage = %agent.stage(),
                    error = %source,
                    "agent failed; recording retry bookkeeping"
                );
                let attempts = self.record_failure(task_id, &source.to_string()).await;
                Err(PipelineError::AgentFailed {
                    agent: agent.name(),
                    stage: agent.stage(),
                    task_id,
                    attempts,
                    source,
                })
            }
        }
    }

    /// Best effort: if the store is down too, the failure is only logged.
    async fn record_failure(&self, task_id: TaskId, message: &str) -> Option<u32> {
        let update = TaskUpdate::new().record_failure(message);
        match self.store.atomic_update(&TaskFilter::by_id(task_id), &update).await {
            Ok(result) => result.task.map(|t| t.retry_metadata.count),
            Err(e) => {
                warn!(%task_id, error = %e, "could not record agent failure");
                None
            }
        }
    }
}

fn is_bookkeeping_only(event: &ChangeEvent) -> bool {
    event.operation == OperationKind::Update
        && !event.updated_fields.is_empty()
        && event
            .updated_fields
            .iter()
            .all(|f| f == RETRY_METADATA_FIELD)
}
