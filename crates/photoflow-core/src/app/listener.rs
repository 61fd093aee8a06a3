//! Change feed listener.
//!
//! Wraps one store subscription and normalises what comes out of it: every
//! store error becomes [`PipelineError::ConnectionLost`], and so does the end
//! of the stream, since a live feed never ends on its own.

use std::sync::Arc;

use futures::StreamExt;

use crate::domain::{ChangeEvent, ChangeFilter, PipelineError};
use crate::ports::{ChangeStream, TaskStore};

pub struct ChangeListener {
    stream: ChangeStream,
}

impl ChangeListener {
    /// Open a subscription for insert, update and replace events.
    pub async fn open(store: &Arc<dyn TaskStore>) -> Result<Self, PipelineError> {
        let stream = store
            .subscribe(ChangeFilter::default())
            .await
            .map_err(|e| PipelineError::ConnectionLost(e.to_string()))?;
        Ok(Self { stream })
    }

    /// Next event. After an `Err` the listener is spent; open a new one.
    pub async fn next_event(&mut self) -> Result<ChangeEvent, PipelineError> {
        match self.stream.next().await {
            Some(Ok(event)) => Ok(event),
            Some(Err(e)) => Err(PipelineError::ConnectionLost(e.to_string())),
            None => Err(PipelineError::ConnectionLost(
                "change stream ended".to_string(),
            )),
        }
    }
}
