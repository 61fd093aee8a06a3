//! Resilience supervisor.
//!
//! Encloses the listen -> dispatch cycle:
//! - opens the change feed, reconnecting with exponential backoff and giving up
//!   after `max_reconnect_attempts` consecutive failures
//! - feeds events to the [`Dispatcher`] one at a time, in arrival order
//! - after a batch-level agent failure, schedules a synthetic `retry` event for
//!   that task while `retry_metadata.count <= handler_retry_limit`
//! - stops on shutdown without interrupting an in-flight agent

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::domain::{ChangeEvent, ErrorKind, PipelineError, TaskId};
use crate::ports::TaskStore;

use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::listener::ChangeListener;
use super::retry::{ReconnectBackoff, RetryPolicy};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_policy: RetryPolicy,
    /// Compared with the task's lifetime `retry_metadata.count`, which every
    /// stage shares: failures in color correction use up retries that
    /// publishing would otherwise get. `0` disables scheduled retries.
    pub handler_retry_limit: u32,
    pub handler_retry_policy: RetryPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_policy: RetryPolicy::standard(),
            handler_retry_limit: 3,
            handler_retry_policy: RetryPolicy::standard(),
        }
    }
}

pub struct Supervisor {
    store: Arc<dyn TaskStore>,
    dispatcher: Arc<Dispatcher>,
    config: SupervisorConfig,
}

enum SessionEnd {
    Shutdown,
    Lost(PipelineError),
}

enum Step {
    Shutdown,
    Event(ChangeEvent),
    Lost(PipelineError),
}

/// Resolves once shutdown was requested or the sender is gone.
async fn stop_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        dispatcher: Arc<Dispatcher>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
        }
    }

    /// Run until shutdown (`Ok`) or until reconnecting is exhausted
    /// (`Err(ReconnectExhausted)`).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), PipelineError> {
        let mut backoff = ReconnectBackoff::new(
            self.config.reconnect_policy.clone(),
            self.config.max_reconnect_attempts,
        );
        // pending handler retries survive reconnects
        let mut retries: JoinSet<TaskId> = JoinSet::new();

        info!("worker starting; watching task changes (insert, update, replace)");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let opened = tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => break,
                opened = ChangeListener::open(&self.store) => opened,
            };

            let failure = match opened {
                Ok(listener) => {
                    backoff.reset();
                    info!("change stream opened");
                    match self.session(listener, &mut shutdown, &mut retries).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(err) => err,
                    }
                }
                Err(err) => err,
            };

            let Some(delay) = backoff.record_failure() else {
                error!(
                    attempts = backoff.attempts(),
                    error = %failure,
                    "failed to connect to the task store; giving up"
                );
                return Err(PipelineError::ReconnectExhausted {
                    attempts: backoff.attempts(),
                });
            };

            warn!(
                attempt = backoff.attempts(),
                max = backoff.max_attempts(),
                error = %failure,
                wait_secs = delay.as_secs_f64(),
                "change stream error; reconnecting"
            );

            tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("worker shut down");
        Ok(())
    }

    async fn session(
        &self,
        mut listener: ChangeListener,
        shutdown: &mut watch::Receiver<bool>,
        retries: &mut JoinSet<TaskId>,
    ) -> SessionEnd {
        loop {
            let step = tokio::select! {
                biased;
                _ = stop_requested(shutdown) => Step::Shutdown,
                Some(joined) = retries.join_next(), if !retries.is_empty() => match joined {
                    Ok(task_id) => Step::Event(ChangeEvent::retry(task_id)),
                    Err(e) => {
                        warn!(error = %e, "retry timer failed");
                        continue;
                    }
                },
                next = listener.next_event() => match next {
                    Ok(event) => Step::Event(event),
                    Err(err) => Step::Lost(err),
                },
            };

            match step {
                Step::Shutdown => return SessionEnd::Shutdown,
                Step::Lost(err) => return SessionEnd::Lost(err),
                // not raced against shutdown: the agent always finishes
                Step::Event(event) => self.handle(event, retries).await,
            }
        }
    }

    async fn handle(&self, event: ChangeEvent, retries: &mut JoinSet<TaskId>) {
        let err = match self.dispatcher.on_event(&event).await {
            Ok(DispatchOutcome::Ran {
                task_id,
                agent,
                outcome,
            }) => {
                debug!(%task_id, agent, ?outcome, "event handled");
                return;
            }
            Ok(DispatchOutcome::NoAgent { .. } | DispatchOutcome::BookkeepingOnly { .. }) => {
                return;
            }
            Err(err) => err,
        };

        match err.kind() {
            ErrorKind::MalformedEvent => {
                warn!(operation = %event.operation, "change without a task id; skipped");
            }
            ErrorKind::MissingTask => {
                warn!(error = %err, "task not found (may have been deleted); skipped");
            }
            ErrorKind::Batch => {
                if let PipelineError::AgentFailed {
                    task_id,
                    attempts: Some(attempts),
                    ..
                } = &err
                {
                    self.schedule_retry(*task_id, *attempts, retries);
                } else {
                    error!(error = %err, "error processing change");
                }
            }
            ErrorKind::Connection | ErrorKind::Item => {
                error!(error = %err, "error processing change");
            }
        }
    }

    fn schedule_retry(&self, task_id: TaskId, attempts: u32, retries: &mut JoinSet<TaskId>) {
        let limit = self.config.handler_retry_limit;
        if attempts > limit {
            warn!(%task_id, attempts, limit, "retry limit reached; task left for manual recovery");
            return;
        }
        let delay = self.config.handler_retry_policy.next_delay(attempts);
        info!(%task_id, attempts, wait_secs = delay.as_secs_f64(), "scheduling agent retry");
        retries.spawn(async move {
            tokio::time::sleep(delay).await;
            task_id
        });
    }

    /// Run on its own task. See [`WorkerHandle`].
    pub fn spawn(self: Arc<Self>) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move { self.run(shutdown_rx).await });
        WorkerHandle {
            shutdown_tx: Arc::new(shutdown_tx),
            join,
        }
    }
}

/// Handle to a spawned supervisor.
/// - `request_shutdown()` (or dropping every trigger and the handle) stops it
///   after the in-flight event
/// - `join()` waits for it to finish
pub struct WorkerHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
    join: JoinHandle<Result<(), PipelineError>>,
}

/// Cloneable shutdown switch, e.g. for a signal handler task.
#[derive(Clone)]
pub struct ShutdownTrigger(Arc<watch::Sender<bool>>);

impl ShutdownTrigger {
    pub fn fire(&self) {
        // ignore send error: the supervisor may already be gone
        let _ = self.0.send(true);
    }
}

impl WorkerHandle {
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger(Arc::clone(&self.shutdown_tx))
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn join(self) -> Result<(), PipelineError> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Ok(()),
        }
    }

    pub async fn shutdown_and_join(self) -> Result<(), PipelineError> {
        self.request_shutdown();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, AgentOutcome, AgentRegistry};
    use crate::domain::{AgentError, Stage, Task, TaskStatus, TaskUpdate};
    use crate::impls::InMemoryTaskStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::Instant;
    use ulid::Ulid;

    /// Fails the first `failures` runs, then commits.
    struct FlakyAgent {
        store: Arc<dyn TaskStore>,
        failures: usize,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl Agent for FlakyAgent {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn stage(&self) -> Stage {
            Stage::ColorCorrection
        }

        async fn execute(&self, task: &Task) -> Result<AgentOutcome, AgentError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run < self.failures {
                return Err(AgentError::Other(format!("transient failure {}", run + 1)));
            }
            let update = TaskUpdate::new().transition(TaskStatus::ColorCorrected);
            crate::agents::commit_stage(self.store.as_ref(), task, update).await
        }
    }

    fn supervisor(
        mem: &Arc<InMemoryTaskStore>,
        agent_failures: usize,
        config: SupervisorConfig,
    ) -> (Arc<Supervisor>, Arc<FlakyAgent>) {
        let store: Arc<dyn TaskStore> = mem.clone();
        let agent = Arc::new(FlakyAgent {
            store: store.clone(),
            failures: agent_failures,
            runs: AtomicUsize::new(0),
        });
        let mut registry = AgentRegistry::new();
        registry.register(agent.clone()).unwrap();
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(registry)));
        (Arc::new(Supervisor::new(store, dispatcher, config)), agent)
    }

    async fn wait_for_subscriber(mem: &InMemoryTaskStore) {
        while mem.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn wait_for_status(mem: &InMemoryTaskStore, id: TaskId, status: TaskStatus) -> Task {
        loop {
            let task = mem.find_by_id(id).await.unwrap().unwrap();
            if task.status == status {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn uploaded_task() -> Task {
        let mut t = Task::new(TaskId::from_ulid(Ulid::new()), "SKU", "P", "US", Utc::now());
        t.status = TaskStatus::PhotosUploaded;
        t
    }

    #[tokio::test(start_paused = true)]
    async fn three_refused_subscriptions_wait_2_4_8_then_recover() {
        let mem = Arc::new(InMemoryTaskStore::new());
        mem.refuse_next_subscriptions(3);
        let (sup, _) = supervisor(&mem, 0, SupervisorConfig::default());

        let started = Instant::now();
        let handle = sup.spawn();
        wait_for_subscriber(&mem).await;
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2 + 4 + 8), "{waited:?}");
        assert!(waited < Duration::from_secs(15), "{waited:?}");

        // counter was reset: one more drop waits 2s again, not 16s
        mem.disconnect_subscribers("blip");
        let dropped = Instant::now();
        while mem.subscriber_count() > 0 {
            tokio::task::yield_now().await;
        }
        wait_for_subscriber(&mem).await;
        let waited = dropped.elapsed();
        assert!(waited >= Duration::from_secs(2), "{waited:?}");
        assert!(waited < Duration::from_secs(3), "{waited:?}");

        handle.shutdown_and_join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_reconnects_are_fatal() {
        let mem = Arc::new(InMemoryTaskStore::new());
        mem.refuse_next_subscriptions(u32::MAX);
        let (sup, _) = supervisor(&mem, 0, SupervisorConfig::default());

        let started = Instant::now();
        let err = sup.spawn().join().await.unwrap_err();

        assert!(matches!(err, PipelineError::ReconnectExhausted { attempts: 5 }));
        assert!(err.is_fatal());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2 + 4 + 8 + 16), "{waited:?}");
        assert!(waited < Duration::from_secs(31), "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_agent_is_retried_until_it_succeeds() {
        let mem = Arc::new(InMemoryTaskStore::new());
        let (sup, agent) = supervisor(&mem, 2, SupervisorConfig::default());
        let handle = sup.spawn();
        wait_for_subscriber(&mem).await;

        let id = mem.insert(uploaded_task()).await.unwrap();
        let done = wait_for_status(&mem, id, TaskStatus::ColorCorrected).await;

        assert_eq!(agent.runs.load(Ordering::SeqCst), 3);
        assert_eq!(done.retry_metadata.count, 2);
        assert_eq!(done.retry_metadata.last_error.as_deref(), Some("transient failure 2"));
        handle.shutdown_and_join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_the_limit() {
        let mem = Arc::new(InMemoryTaskStore::new());
        let config = SupervisorConfig {
            handler_retry_limit: 1,
            ..SupervisorConfig::default()
        };
        let (sup, agent) = supervisor(&mem, usize::MAX, config);
        let handle = sup.spawn();
        wait_for_subscriber(&mem).await;

        let id = mem.insert(uploaded_task()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        // first run + one scheduled retry
        assert_eq!(agent.runs.load(Ordering::SeqCst), 2);
        let task = mem.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::PhotosUploaded);
        assert_eq!(task.retry_metadata.count, 2);
        handle.shutdown_and_join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_events_do_not_stop_the_loop() {
        let mem = Arc::new(InMemoryTaskStore::new());
        let (sup, agent) = supervisor(&mem, 0, SupervisorConfig::default());
        let handle = sup.spawn();
        wait_for_subscriber(&mem).await;

        mem.emit_raw(ChangeEvent::without_task(crate::domain::OperationKind::Update));
        mem.emit_raw(ChangeEvent::insert(TaskId::from_ulid(Ulid::new())));
        let id = mem.insert(uploaded_task()).await.unwrap();

        wait_for_status(&mem, id, TaskStatus::ColorCorrected).await;
        assert_eq!(agent.runs.load(Ordering::SeqCst), 1);
        assert!(!handle.is_finished());
        handle.shutdown_and_join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn huge_retry_count_waits_the_capped_delay() {
        let mem = Arc::new(InMemoryTaskStore::new());
        let config = SupervisorConfig {
            handler_retry_limit: 1_000,
            ..SupervisorConfig::default()
        };
        let (sup, agent) = supervisor(&mem, 1, config);
        let handle = sup.spawn();
        wait_for_subscriber(&mem).await;

        let mut task = uploaded_task();
        task.retry_metadata.count = 63;
        let id = mem.insert(task).await.unwrap();

        let started = Instant::now();
        let done = wait_for_status(&mem, id, TaskStatus::ColorCorrected).await;

        assert!(started.elapsed() >= Duration::from_secs(3600));
        assert_eq!(agent.runs.load(Ordering::SeqCst), 2);
        assert_eq!(done.retry_metadata.count, 64);
        assert!(!handle.is_finished());
        handle.shutdown_and_join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_shared_by_all_stages() {
        let mem = Arc::new(InMemoryTaskStore::new());
        let (sup, agent) = supervisor(&mem, usize::MAX, SupervisorConfig::default());
        let handle = sup.spawn();
        wait_for_subscriber(&mem).await;

        // earlier stages already used the default budget of 3
        let mut task = uploaded_task();
        task.retry_metadata.count = 3;
        let id = mem.insert(task).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(agent.runs.load(Ordering::SeqCst), 1);
        let task = mem.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.retry_metadata.count, 4);
        handle.shutdown_and_join().await.unwrap();
    }

    /// Blocks inside `execute` until released.
    struct GatedAgent {
        store: Arc<dyn TaskStore>,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Agent for GatedAgent {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn stage(&self) -> Stage {
            Stage::ColorCorrection
        }

        async fn execute(&self, task: &Task) -> Result<AgentOutcome, AgentError> {
            self.entered.notify_one();
            self.release.notified().await;
            let update = TaskUpdate::new().transition(TaskStatus::ColorCorrected);
            crate::agents::commit_stage(self.store.as_ref(), task, update).await
        }
    }

    #[tokio::test]
    async fn shutdown_waits_for_the_running_agent() {
        let mem = Arc::new(InMemoryTaskStore::new());
        let store: Arc<dyn TaskStore> = mem.clone();
        let agent = Arc::new(GatedAgent {
            store: store.clone(),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let mut registry = AgentRegistry::new();
        registry.register(agent.clone()).unwrap();
        let dispatcher = Arc::new(Dispatcher::new(store.clone(), Arc::new(registry)));
        let sup = Arc::new(Supervisor::new(store, dispatcher, SupervisorConfig::default()));

        let handle = sup.spawn();
        wait_for_subscriber(&mem).await;
        let id = mem.insert(uploaded_task()).await.unwrap();

        agent.entered.notified().await;
        handle.request_shutdown();
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        agent.release.notify_one();
        handle.join().await.unwrap();

        let task = mem.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::ColorCorrected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_backoff_returns_ok() {
        let mem = Arc::new(InMemoryTaskStore::new());
        mem.refuse_next_subscriptions(u32::MAX);
        let (sup, _) = supervisor(&mem, 0, SupervisorConfig::default());

        let handle = sup.spawn();
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.shutdown_and_join().await.unwrap();
    }
}
