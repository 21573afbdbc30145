//! Single logical writer per Task.
//!
//! Every phase change, whether it comes from the reconcile path or from an
//! execution unit, is sent to a per-task actor and applied in arrival order.
//! The actor re-reads the task before each attempt, so a write never rests on
//! a stale copy held by the caller. Stale-version conflicts caused by writers
//! outside this process are retried up to `max_attempts`.
//!
//! An actor exits after it has written a terminal phase, or when its mailbox
//! is dropped through [`TaskWriter::forget`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::lifecycle::PhaseTransition;
use crate::core::resource::{NamespacedName, Task};
use crate::core::store::ResourceStore;
use crate::core::{SchedulerError, Spawn};
use crate::util::telemetry::Logger;

struct WriteCommand {
    transition: PhaseTransition,
    reply: oneshot::Sender<Result<Task, SchedulerError>>,
}

struct Mailbox {
    id: u64,
    tx: mpsc::UnboundedSender<WriteCommand>,
}

struct WriterInner<S, Sp> {
    store: Arc<S>,
    spawner: Sp,
    max_attempts: u32,
    mailboxes: Mutex<HashMap<NamespacedName, Mailbox>>,
    next_id: AtomicU64,
    audit: Option<Arc<dyn AuditSink>>,
    log: Logger,
}

/// Serializes phase writes per task key.
pub struct TaskWriter<S, Sp> {
    inner: Arc<WriterInner<S, Sp>>,
}

impl<S, Sp> Clone for TaskWriter<S, Sp> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, Sp> TaskWriter<S, Sp> {
    /// Drop the mailbox for `key`, letting its actor exit once drained.
    pub fn forget(&self, key: &NamespacedName) {
        self.inner.mailboxes.lock().remove(key);
    }

    /// Number of live per-task actors.
    #[must_use]
    pub fn active_actors(&self) -> usize {
        self.inner.mailboxes.lock().len()
    }
}

impl<S, Sp> TaskWriter<S, Sp>
where
    S: ResourceStore,
    Sp: Spawn,
{
    /// Create a writer. `max_attempts` is clamped to at least one.
    pub fn new(
        store: Arc<S>,
        spawner: Sp,
        max_attempts: u32,
        audit: Option<Arc<dyn AuditSink>>,
        log: Logger,
    ) -> Self {
        Self {
            inner: Arc::new(WriterInner {
                store,
                spawner,
                max_attempts: max_attempts.max(1),
                mailboxes: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                audit,
                log,
            }),
        }
    }

    /// Apply `transition` to the task at `key` and return the stored task.
    ///
    /// # Errors
    ///
    /// `PhaseMismatch` if the task is no longer in `transition.expected`,
    /// `InvalidTransition` for an illegal edge, `NotFound` if the task is
    /// gone, `PersistenceConflict` once retries are exhausted, and any other
    /// store error unchanged.
    pub async fn transition(
        &self,
        key: &NamespacedName,
        transition: PhaseTransition,
    ) -> Result<Task, SchedulerError> {
        let (reply, rx) = oneshot::channel();
        let mut cmd = WriteCommand { transition, reply };
        loop {
            let (id, tx) = self.mailbox(key);
            match tx.send(cmd) {
                Ok(()) => break,
                Err(mpsc::error::SendError(returned)) => {
                    // actor exited between lookup and send
                    self.remove_mailbox(key, id);
                    cmd = returned;
                }
            }
        }
        rx.await.map_err(|_| SchedulerError::Cancelled)?
    }

    fn mailbox(&self, key: &NamespacedName) -> (u64, mpsc::UnboundedSender<WriteCommand>) {
        let mut mailboxes = self.inner.mailboxes.lock();
        if let Some(mailbox) = mailboxes.get(key) {
            return (mailbox.id, mailbox.tx.clone());
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        mailboxes.insert(key.clone(), Mailbox { id, tx: tx.clone() });
        drop(mailboxes);

        tracing::debug!(parent: self.inner.log.span(), task = %key, actor = id, "starting task writer");
        let _actor = self
            .inner
            .spawner
            .spawn(Self::run_actor(self.clone(), key.clone(), id, rx));
        (id, tx)
    }

    fn remove_mailbox(&self, key: &NamespacedName, id: u64) {
        let mut mailboxes = self.inner.mailboxes.lock();
        if mailboxes.get(key).is_some_and(|m| m.id == id) {
            mailboxes.remove(key);
        }
    }

    async fn run_actor(
        self,
        key: NamespacedName,
        id: u64,
        mut rx: mpsc::UnboundedReceiver<WriteCommand>,
    ) {
        while let Some(cmd) = rx.recv().await {
            let result = self.apply(&key, &cmd.transition).await;
            let settled = result
                .as_ref()
                .is_ok_and(|task| task.status.phase.is_settled());
            let _ = cmd.reply.send(result);
            if settled {
                break;
            }
        }

        self.remove_mailbox(&key, id);
        rx.close();
        while let Ok(cmd) = rx.try_recv() {
            let result = self.apply(&key, &cmd.transition).await;
            let _ = cmd.reply.send(result);
        }
        tracing::debug!(parent: self.inner.log.span(), task = %key, actor = id, "task writer exited");
    }

    async fn apply(
        &self,
        key: &NamespacedName,
        transition: &PhaseTransition,
    ) -> Result<Task, SchedulerError> {
        let inner = &self.inner;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(mut task) = inner
                .store
                .get::<Task>(&key.namespace, &key.name)
                .await?
            else {
                return Err(SchedulerError::not_found("Task", key.to_string()));
            };
            transition.apply(&mut task)?;

            match inner.store.update(&task).await {
                Ok(stored) => {
                    tracing::info!(
                        parent: inner.log.span(),
                        task = %key,
                        from = %transition.expected,
                        to = %transition.target,
                        attempt,
                        "task phase updated"
                    );
                    if let Some(audit) = &inner.audit {
                        audit.record(build_audit_event(
                            key,
                            stored.spec.user_id.clone(),
                            "phase",
                            Some(transition.target.to_string()),
                        ));
                    }
                    return Ok(stored);
                }
                Err(err) if err.is_conflict() && attempt < inner.max_attempts => {
                    tracing::warn!(
                        parent: inner.log.span(),
                        task = %key,
                        to = %transition.target,
                        attempt,
                        "conflict writing task phase, re-reading"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        parent: inner.log.span(),
                        task = %key,
                        to = %transition.target,
                        attempt,
                        error = %err,
                        "update task phase failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}
