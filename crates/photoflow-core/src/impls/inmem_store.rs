//! In-memory task store.
//!
//! Development and test implementation of [`TaskStore`]. Documents live in a
//! `HashMap` behind one async mutex; every committed write is announced on a
//! broadcast channel that backs the change feed.
//!
//! The store can also misbehave on purpose: refuse the next N subscriptions,
//! drop every live subscription, or emit an event with no task id. The
//! supervisor tests drive reconnect and skip paths through these hooks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Mutex, broadcast};
use tracing::warn;

use crate::domain::{
    ChangeEvent, ChangeFilter, StoreError, Task, TaskFilter, TaskId, TaskUpdate, UpdateResult,
};
use crate::ports::{ChangeStream, TaskStore};

/// What travels on the internal feed.
#[derive(Debug, Clone)]
enum FeedMessage {
    Change(ChangeEvent),
    Disconnect(String),
}

struct InMemoryStoreState {
    tasks: HashMap<TaskId, Task>,
    /// Insertion order, for `find_by_sku` ("oldest first").
    order: Vec<TaskId>,
}

pub struct InMemoryTaskStore {
    state: Mutex<InMemoryStoreState>,
    feed: broadcast::Sender<FeedMessage>,
    refuse_subscriptions: AtomicU32,
}

impl InMemoryTaskStore {
    const FEED_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_feed_capacity(Self::FEED_CAPACITY)
    }

    /// A subscriber that falls more than `capacity` events behind is cut off.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(InMemoryStoreState {
                tasks: HashMap::new(),
                order: Vec::new(),
            }),
            feed,
            refuse_subscriptions: AtomicU32::new(0),
        }
    }

    /// Make the next `n` calls to `subscribe` fail with a connection error.
    pub fn refuse_next_subscriptions(&self, n: u32) {
        self.refuse_subscriptions.store(n, Ordering::SeqCst);
    }

    /// Terminate every open subscription with a connection error.
    pub fn disconnect_subscribers(&self, reason: impl Into<String>) {
        let _ = self.feed.send(FeedMessage::Disconnect(reason.into()));
    }

    /// Push a raw event onto the feed without touching any document.
    pub fn emit_raw(&self, event: ChangeEvent) {
        let _ = self.feed.send(FeedMessage::Change(event));
    }

    pub fn subscriber_count(&self) -> usize {
        self.feed.receiver_count()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.tasks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn announce(&self, event: ChangeEvent) {
        // ignore send error: no subscribers is fine
        let _ = self.feed.send(FeedMessage::Change(event));
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn find_by_sku(&self, sku_code: &str) -> Result<Option<Task>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.tasks.get(id))
            .find(|task| task.sku_code == sku_code)
            .cloned())
    }

    async fn insert(&self, task: Task) -> Result<TaskId, StoreError> {
        let id = task.id;
        {
            let mut state = self.state.lock().await;
            if state.tasks.contains_key(&id) {
                return Err(StoreError::Duplicate(id));
            }
            state.tasks.insert(id, task);
            state.order.push(id);
        } // Lock released here

        self.announce(ChangeEvent::insert(id));
        Ok(id)
    }

    async fn atomic_update(
        &self,
        filter: &TaskFilter,
        update: &TaskUpdate,
    ) -> Result<UpdateResult, StoreError> {
        let updated = {
            let mut state = self.state.lock().await;
            match state.tasks.get_mut(&filter.id) {
                Some(task) if filter.matches(task) => {
                    update.apply(task);
                    Some(task.clone())
                }
                _ => None,
            }
        };

        if updated.is_some() {
            self.announce(ChangeEvent::update(filter.id, update.updated_fields()));
        }
        Ok(UpdateResult { task: updated })
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<ChangeStream, StoreError> {
        let refused = self
            .refuse_subscriptions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(StoreError::Connection(
                "subscription refused by store".to_string(),
            ));
        }

        let rx = self.feed.subscribe();
        let stream = futures::stream::unfold(Some(rx), move |rx| {
            let filter = filter.clone();
            async move {
                let mut rx = rx?;
                loop {
                    match rx.recv().await {
                        Ok(FeedMessage::Change(event)) => {
                            if filter.matches(event.operation) {
                                return Some((Ok(event), Some(rx)));
                            }
                        }
                        Ok(FeedMessage::Disconnect(reason)) => {
                            return Some((Err(StoreError::Connection(reason)), None));
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "change feed subscriber lagged; closing subscription");
                            let reason = format!("subscriber lagged; {skipped} events dropped");
                            return Some((Err(StoreError::Connection(reason)), None));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
