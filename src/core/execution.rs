//! Supervised execution of admitted tasks.
//!
//! Each admitted task gets one execution unit: it moves the task
//! `Ready -> InProgress`, runs the [`TaskExecutor`], then moves it
//! `InProgress -> Complete`. The reconciler launches the unit and returns
//! without waiting. The supervisor keeps an [`ExecutionHandle`] per task so
//! completion can be awaited and the unit cancelled. A unit drops its own
//! handle when it ends, so only live units are tracked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::core::executor::{Spawn, TaskExecutor};
use crate::core::lifecycle::PhaseTransition;
use crate::core::resource::{NamespacedName, TaskPhase};
use crate::core::store::ResourceStore;
use crate::core::writer::TaskWriter;
use crate::util::telemetry::Logger;

/// How an execution unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The task ran and `Complete` was persisted.
    Completed,
    /// The unit was cancelled before the task finished.
    Cancelled,
    /// A phase write failed; the task keeps its last persisted phase.
    WriteFailed(String),
    /// The executor panicked.
    Panicked(String),
}

/// Handle to one execution unit.
pub struct ExecutionHandle {
    id: u64,
    cancel: Option<oneshot::Sender<()>>,
    join: JoinHandle<ExecutionOutcome>,
}

impl ExecutionHandle {
    /// Request cancellation. Returns false if it was already requested or the
    /// unit already finished.
    pub fn cancel(&mut self) -> bool {
        self.cancel.take().is_some_and(|tx| tx.send(()).is_ok())
    }

    /// Whether the unit has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the unit to end.
    pub async fn wait(self) -> ExecutionOutcome {
        let Self { cancel, join, .. } = self;
        let outcome = match join.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => ExecutionOutcome::Cancelled,
            Err(err) => ExecutionOutcome::Panicked(err.to_string()),
        };
        drop(cancel);
        outcome
    }
}

struct SupervisorInner<S, Sp, E> {
    writer: TaskWriter<S, Sp>,
    executor: E,
    spawner: Sp,
    handles: Mutex<HashMap<NamespacedName, ExecutionHandle>>,
    next_id: AtomicU64,
    log: Logger,
}

/// Untracks a unit when it ends, including by panic or abort.
struct UnitGuard<S, Sp, E> {
    inner: Weak<SupervisorInner<S, Sp, E>>,
    key: NamespacedName,
    id: u64,
    started: bool,
    completed: bool,
}

impl<S, Sp, E> Drop for UnitGuard<S, Sp, E> {
    fn drop(&mut self) {
        // a unit dropped before it started is untracked by `launch`
        if !self.started {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        {
            let mut handles = inner.handles.lock();
            if handles.get(&self.key).is_some_and(|h| h.id == self.id) {
                handles.remove(&self.key);
            }
        }
        if !self.completed {
            // the writer actor only exits on its own after a terminal phase
            inner.writer.forget(&self.key);
        }
    }
}

/// Launches and tracks execution units.
pub struct ExecutionSupervisor<S, Sp, E> {
    inner: Arc<SupervisorInner<S, Sp, E>>,
}

impl<S, Sp, E> Clone for ExecutionSupervisor<S, Sp, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, Sp, E> ExecutionSupervisor<S, Sp, E>
where
    S: ResourceStore,
    Sp: Spawn + Clone,
    E: TaskExecutor,
{
    /// Create a supervisor writing phases through `writer`.
    pub fn new(writer: TaskWriter<S, Sp>, executor: E, spawner: Sp, log: Logger) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                writer,
                executor,
                spawner,
                handles: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                log,
            }),
        }
    }

    /// Start executing the task at `key`, which must be `Ready`.
    ///
    /// Returns false without launching if a unit for `key` is still running.
    pub fn launch(&self, key: NamespacedName) -> bool {
        let mut handles = self.inner.handles.lock();
        if handles.get(&key).is_some_and(|h| !h.is_finished()) {
            tracing::warn!(parent: self.inner.log.span(), task = %key, "execution already running");
            return false;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = UnitGuard {
            inner: Arc::downgrade(&self.inner),
            key: key.clone(),
            id,
            started: false,
            completed: false,
        };
        // the unit waits for `start` so it cannot untrack itself before it is tracked
        let (start_tx, start_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let join = self.inner.spawner.spawn(Self::run(
            self.inner.writer.clone(),
            self.inner.executor.clone(),
            self.inner.log.clone(),
            guard,
            start_rx,
            cancel_rx,
        ));
        handles.insert(
            key.clone(),
            ExecutionHandle {
                id,
                cancel: Some(cancel_tx),
                join,
            },
        );
        drop(handles);

        if start_tx.send(()).is_err() {
            tracing::warn!(parent: self.inner.log.span(), task = %key, "execution unit dropped before start");
            let mut handles = self.inner.handles.lock();
            if handles.get(&key).is_some_and(|h| h.id == id) {
                handles.remove(&key);
            }
            return false;
        }
        true
    }

    /// Request cancellation of the unit for `key`.
    pub fn cancel(&self, key: &NamespacedName) -> bool {
        self.inner
            .handles
            .lock()
            .get_mut(key)
            .is_some_and(ExecutionHandle::cancel)
    }

    /// Whether a unit for `key` is tracked and not yet finished.
    #[must_use]
    pub fn is_running(&self, key: &NamespacedName) -> bool {
        self.inner
            .handles
            .lock()
            .get(key)
            .is_some_and(|h| !h.is_finished())
    }

    /// Keys of all tracked units that have not finished.
    #[must_use]
    pub fn running(&self) -> Vec<NamespacedName> {
        let mut keys: Vec<_> = self
            .inner
            .handles
            .lock()
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Wait for the unit for `key` and stop tracking it.
    /// `None` if no unit is tracked for `key`.
    pub async fn wait(&self, key: &NamespacedName) -> Option<ExecutionOutcome> {
        let handle = self.inner.handles.lock().remove(key)?;
        Some(handle.wait().await)
    }

    /// Number of tracked units.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.inner.handles.lock().len()
    }

    /// Cancel all units and wait for them.
    pub async fn shutdown(&self) -> Vec<(NamespacedName, ExecutionOutcome)> {
        let handles: Vec<_> = self.inner.handles.lock().drain().collect();
        tracing::info!(parent: self.inner.log.span(), units = handles.len(), "shutting down executions");
        let mut outcomes = Vec::with_capacity(handles.len());
        for (key, mut handle) in handles {
            handle.cancel();
            outcomes.push((key, handle.wait().await));
        }
        outcomes
    }

    async fn run(
        writer: TaskWriter<S, Sp>,
        executor: E,
        log: Logger,
        mut guard: UnitGuard<S, Sp, E>,
        start_rx: oneshot::Receiver<()>,
        cancel_rx: oneshot::Receiver<()>,
    ) -> ExecutionOutcome {
        if start_rx.await.is_err() {
            return ExecutionOutcome::Cancelled;
        }
        guard.started = true;
        let outcome = Self::execute(&writer, &executor, &log, &guard.key, cancel_rx).await;
        guard.completed = outcome == ExecutionOutcome::Completed;
        outcome
    }

    async fn execute(
        writer: &TaskWriter<S, Sp>,
        executor: &E,
        log: &Logger,
        key: &NamespacedName,
        mut cancel_rx: oneshot::Receiver<()>,
    ) -> ExecutionOutcome {
        let cancel = match cancel_rx.try_recv() {
            Ok(()) => return ExecutionOutcome::Cancelled,
            Err(oneshot::error::TryRecvError::Empty) => Some(cancel_rx),
            Err(oneshot::error::TryRecvError::Closed) => {
                tracing::debug!(parent: log.span(), task = %key, "execution handle dropped, running uncancellable");
                None
            }
        };

        tracing::info!(parent: log.span(), task = %key, "start running task");
        let task = match writer
            .transition(key, PhaseTransition::new(TaskPhase::Ready, TaskPhase::InProgress))
            .await
        {
            Ok(task) => task,
            Err(err) => {
                tracing::error!(parent: log.span(), task = %key, error = %err, "could not mark task in progress");
                return ExecutionOutcome::WriteFailed(err.to_string());
            }
        };

        tokio::select! {
            () = executor.execute(task) => {}
            () = cancelled(cancel) => {
                tracing::info!(parent: log.span(), task = %key, "task execution cancelled");
                return ExecutionOutcome::Cancelled;
            }
        }
        tracing::info!(parent: log.span(), task = %key, "task completed");

        match writer
            .transition(key, PhaseTransition::new(TaskPhase::InProgress, TaskPhase::Complete))
            .await
        {
            Ok(_) => ExecutionOutcome::Completed,
            Err(err) => {
                tracing::error!(parent: log.span(), task = %key, error = %err, "could not mark task complete");
                ExecutionOutcome::WriteFailed(err.to_string())
            }
        }
    }
}

/// Resolves once cancellation is requested; never resolves if the sender is
/// gone without sending.
async fn cancelled(cancel: Option<oneshot::Receiver<()>>) {
    if let Some(rx) = cancel {
        if rx.await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::executor::SimulatedExecutor;
    use crate::core::resource::{Resource, Task};
    use crate::infra::store::InMemoryStore;
    use crate::runtime::TokioSpawner;
    use std::time::Duration;

    type Supervisor = ExecutionSupervisor<InMemoryStore, TokioSpawner, SimulatedExecutor>;

    fn supervisor(store: &Arc<InMemoryStore>, run_for: Duration) -> Supervisor {
        let spawner = TokioSpawner::current();
        let writer = TaskWriter::new(Arc::clone(store), spawner.clone(), 3, None, Logger::disabled());
        ExecutionSupervisor::new(
            writer,
            SimulatedExecutor::new(run_for, Logger::disabled()),
            spawner,
            Logger::disabled(),
        )
    }

    #[tokio::test]
    async fn test_ready_task_runs_to_complete() {
        let store = Arc::new(InMemoryStore::new());
        let task = store
            .insert(Task::new("ns", "t1", "alice", "c").with_phase(TaskPhase::Ready))
            .unwrap();
        let sup = supervisor(&store, Duration::from_millis(10));

        assert!(sup.launch(task.key()));
        assert_eq!(sup.wait(&task.key()).await, Some(ExecutionOutcome::Completed));

        let stored: Task = store.get("ns", "t1").await.unwrap().unwrap();
        assert_eq!(stored.status.phase, TaskPhase::Complete);
        assert!(sup.wait(&task.key()).await.is_none());
    }

    #[tokio::test]
    async fn test_in_progress_is_visible_while_running() {
        let store = Arc::new(InMemoryStore::new());
        let task = store
            .insert(Task::new("ns", "t1", "alice", "c").with_phase(TaskPhase::Ready))
            .unwrap();
        let sup = supervisor(&store, Duration::from_secs(30));
        sup.launch(task.key());

        let mut phase = TaskPhase::Ready;
        for _ in 0..100 {
            let stored: Task = store.get("ns", "t1").await.unwrap().unwrap();
            phase = stored.status.phase;
            if phase == TaskPhase::InProgress {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(phase, TaskPhase::InProgress);
        assert!(sup.is_running(&task.key()));
        assert_eq!(sup.running(), vec![task.key()]);
        assert!(!sup.launch(task.key()));

        assert!(sup.cancel(&task.key()));
        assert_eq!(sup.wait(&task.key()).await, Some(ExecutionOutcome::Cancelled));
        let stored: Task = store.get("ns", "t1").await.unwrap().unwrap();
        assert_eq!(stored.status.phase, TaskPhase::InProgress);
    }

    #[tokio::test]
    async fn test_not_ready_task_fails_to_start() {
        let store = Arc::new(InMemoryStore::new());
        let task = store
            .insert(Task::new("ns", "t1", "alice", "c").with_phase(TaskPhase::Queued))
            .unwrap();
        let sup = supervisor(&store, Duration::from_millis(1));
        sup.launch(task.key());
        assert!(matches!(
            sup.wait(&task.key()).await,
            Some(ExecutionOutcome::WriteFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_everything() {
        let store = Arc::new(InMemoryStore::new());
        let sup = supervisor(&store, Duration::from_secs(60));
        for name in ["a", "b"] {
            let task = store
                .insert(Task::new("ns", name, "alice", "c").with_phase(TaskPhase::Ready))
                .unwrap();
            sup.launch(task.key());
        }
        let outcomes = sup.shutdown().await;
        assert_eq!(outcomes.len(), 2);
        assert!(sup.running().is_empty());
    }

    async fn settle(sup: &Supervisor) {
        for _ in 0..200 {
            if sup.tracked() == 0 && sup.inner.writer.active_actors() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_finished_units_untrack_themselves() {
        let store = Arc::new(InMemoryStore::new());
        let sup = supervisor(&store, Duration::from_millis(1));
        for name in ["a", "b", "c"] {
            let task = store
                .insert(Task::new("ns", name, "alice", "c").with_phase(TaskPhase::Ready))
                .unwrap();
            assert!(sup.launch(task.key()));
        }
        assert_eq!(sup.tracked(), 3);

        settle(&sup).await;
        assert_eq!(sup.tracked(), 0);
        assert_eq!(sup.inner.writer.active_actors(), 0);
        for name in ["a", "b", "c"] {
            let stored: Task = store.get("ns", name).await.unwrap().unwrap();
            assert_eq!(stored.status.phase, TaskPhase::Complete);
        }
    }

    #[tokio::test]
    async fn test_cancelled_unit_releases_its_writer() {
        let store = Arc::new(InMemoryStore::new());
        let task = store
            .insert(Task::new("ns", "t1", "alice", "c").with_phase(TaskPhase::Ready))
            .unwrap();
        let sup = supervisor(&store, Duration::from_secs(60));
        sup.launch(task.key());
        for _ in 0..100 {
            let stored: Task = store.get("ns", "t1").await.unwrap().unwrap();
            if stored.status.phase == TaskPhase::InProgress {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sup.inner.writer.active_actors(), 1);

        assert!(sup.cancel(&task.key()));
        settle(&sup).await;
        assert_eq!(sup.tracked(), 0);
        assert_eq!(sup.inner.writer.active_actors(), 0);
    }

    #[tokio::test]
    async fn test_failed_start_releases_its_writer() {
        let store = Arc::new(InMemoryStore::new());
        store
            .insert(Task::new("ns", "t1", "alice", "c").with_phase(TaskPhase::Queued))
            .unwrap();
        let sup = supervisor(&store, Duration::from_millis(1));
        sup.launch(NamespacedName::new("ns", "t1"));

        settle(&sup).await;
        assert_eq!(sup.tracked(), 0);
        assert_eq!(sup.inner.writer.active_actors(), 0);
    }

    #[tokio::test]
    async fn test_dropped_cancel_sender_runs_to_complete() {
        let store = Arc::new(InMemoryStore::new());
        let task = store
            .insert(Task::new("ns", "t1", "alice", "c").with_phase(TaskPhase::Ready))
            .unwrap();
        let sup = supervisor(&store, Duration::from_millis(10));
        assert!(sup.launch(task.key()));

        // the unit has not been polled yet on the current-thread runtime
        let sender = sup
            .inner
            .handles
            .lock()
            .get_mut(&task.key())
            .and_then(|h| h.cancel.take());
        assert!(sender.is_some());
        drop(sender);

        assert_eq!(sup.wait(&task.key()).await, Some(ExecutionOutcome::Completed));
        let stored: Task = store.get("ns", "t1").await.unwrap().unwrap();
        assert_eq!(stored.status.phase, TaskPhase::Complete);
    }
}
