use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{Stage, TaskStatus};

use super::Agent;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("an agent for stage '{stage}' is already registered ('{existing}')")]
    AlreadyRegistered { stage: Stage, existing: &'static str },
}

/// Registry of agents (stage -> agent).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used during runtime (immutable, shared behind `Arc`).
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<Stage, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Register an agent for its stage. One agent per stage.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        let stage = agent.stage();
        if let Some(existing) = self.agents.get(&stage) {
            return Err(RegistryError::AlreadyRegistered {
                stage,
                existing: existing.name(),
            });
        }
        self.agents.insert(stage, agent);
        Ok(())
    }

    pub fn get(&self, stage: Stage) -> Option<&Arc<dyn Agent>> {
        self.agents.get(&stage)
    }

    /// The agent whose stage `status` triggers, if any.
    pub fn route(&self, status: TaskStatus) -> Option<&Arc<dyn Agent>> {
        status.stage().and_then(|stage| self.get(stage))
    }

    /// Stages of `expected` with no agent, in the order given.
    pub fn missing_stages(&self, expected: &[Stage]) -> Vec<Stage> {
        expected
            .iter()
            .copied()
            .filter(|s| !self.agents.contains_key(s))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
