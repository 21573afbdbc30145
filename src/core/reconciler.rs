//! Task reconciler.
//!
//! Level-triggered: every call re-reads the task and derives what to do from
//! its persisted phase. A task with an empty phase is claimed, priced against
//! its user's budget and either admitted (Ready, execution launched, workload
//! converged) or failed with a message. Any other phase is left alone, except
//! when a `Failed` write is still owed from an earlier call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::budget::{AdmitResult, BudgetAccountant};
use crate::core::execution::ExecutionSupervisor;
use crate::core::executor::{Spawn, TaskExecutor};
use crate::core::lifecycle::PhaseTransition;
use crate::core::resource::{NamespacedName, Task, TaskPhase};
use crate::core::store::ResourceStore;
use crate::core::workload::WorkloadMaterializer;
use crate::core::writer::TaskWriter;
use crate::core::SchedulerError;
use crate::util::telemetry::Logger;

/// Message written when the task's user has no budget.
pub const NO_BUDGET_MESSAGE: &str = "Task's user does not have budget";
/// Message written when admission is denied.
pub const INSUFFICIENT_BUDGET_MESSAGE: &str = "Task does not have enough budget";

/// What the dispatcher should do after a reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Re-deliver the key after this delay.
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// No requeue.
    #[must_use]
    pub const fn done() -> Self {
        Self {
            requeue_after: None,
        }
    }

    /// Requeue after `delay`.
    #[must_use]
    pub const fn requeue(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }
}

/// Drives tasks from submission to admission or failure.
pub struct TaskReconciler<S, Sp, E> {
    store: Arc<S>,
    accountant: BudgetAccountant<S>,
    writer: TaskWriter<S, Sp>,
    supervisor: ExecutionSupervisor<S, Sp, E>,
    materializer: WorkloadMaterializer<S>,
    pending: Mutex<HashMap<NamespacedName, PhaseTransition>>,
    pending_retry_interval: Duration,
    audit: Option<Arc<dyn AuditSink>>,
    log: Logger,
}

impl<S, Sp, E> TaskReconciler<S, Sp, E>
where
    S: ResourceStore,
    Sp: Spawn + Clone,
    E: TaskExecutor,
{
    /// Assemble a reconciler from its parts. All parts should share `store`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        accountant: BudgetAccountant<S>,
        writer: TaskWriter<S, Sp>,
        supervisor: ExecutionSupervisor<S, Sp, E>,
        materializer: WorkloadMaterializer<S>,
        pending_retry_interval: Duration,
        audit: Option<Arc<dyn AuditSink>>,
        log: Logger,
    ) -> Self {
        Self {
            store,
            accountant,
            writer,
            supervisor,
            materializer,
            pending: Mutex::new(HashMap::new()),
            pending_retry_interval,
            audit,
            log,
        }
    }

    /// Execution supervisor, for awaiting or cancelling launched tasks.
    #[must_use]
    pub const fn supervisor(&self) -> &ExecutionSupervisor<S, Sp, E> {
        &self.supervisor
    }

    /// Phase writer shared with the supervisor.
    #[must_use]
    pub const fn writer(&self) -> &TaskWriter<S, Sp> {
        &self.writer
    }

    /// Keys with a phase write still owed.
    #[must_use]
    pub fn pending(&self) -> Vec<NamespacedName> {
        let mut keys: Vec<_> = self.pending.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Reconcile the task at `key`.
    ///
    /// # Errors
    ///
    /// Admission errors (`NotFound` for a missing budget or cost,
    /// `InsufficientBudget`) after the task has been failed; store errors from
    /// the claim, the `Ready` write or workload convergence.
    pub async fn reconcile(&self, key: &NamespacedName) -> Result<ReconcileResult, SchedulerError> {
        let Some(task) = self
            .store
            .get::<Task>(&key.namespace, &key.name)
            .await?
        else {
            tracing::debug!(parent: self.log.span(), task = %key, "task not found");
            self.pending.lock().remove(key);
            self.writer.forget(key);
            return Ok(ReconcileResult::done());
        };

        let owed = self.pending.lock().get(key).cloned();
        if let Some(transition) = owed {
            return Ok(self.retry_pending(key, transition).await);
        }

        if task.status.phase.is_observed() {
            tracing::debug!(parent: self.log.span(), task = %key, phase = %task.status.phase, "task already observed");
            return Ok(ReconcileResult::done());
        }

        let user = task.spec.user_id.clone();
        let queued = match self
            .writer
            .transition(key, PhaseTransition::new(TaskPhase::Pending, TaskPhase::Queued))
            .await
        {
            Ok(queued) => queued,
            Err(SchedulerError::PhaseMismatch { actual, .. }) => {
                tracing::debug!(parent: self.log.span(), task = %key, phase = %actual, "task claimed elsewhere");
                return Ok(ReconcileResult::done());
            }
            Err(err) => {
                tracing::error!(parent: self.log.span(), task = %key, error = %err, "could not queue task");
                return Err(err);
            }
        };
        self.record(key, &user, "claim", None);

        let verdict = self
            .accountant
            .admit(&queued, &user, &key.namespace)
            .await
            .and_then(|result| result.into_verdict(&key.name));
        let admitted = match verdict {
            Ok(admitted) => admitted,
            Err(err) => {
                self.fail(key, &user, &err).await;
                return Err(err);
            }
        };
        self.record(key, &user, "admit", Some(describe(&admitted)));

        let ready = match self
            .writer
            .transition(key, PhaseTransition::new(TaskPhase::Queued, TaskPhase::Ready))
            .await
        {
            Ok(ready) => ready,
            Err(err) => {
                tracing::error!(parent: self.log.span(), task = %key, error = %err, "could not mark task ready");
                self.fail(key, &user, &err).await;
                return Err(err);
            }
        };

        self.supervisor.launch(key.clone());
        self.materializer.converge(&ready).await?;
        Ok(ReconcileResult::done())
    }

    async fn fail(&self, key: &NamespacedName, user: &str, cause: &SchedulerError) {
        let message = failure_message(cause);
        tracing::warn!(parent: self.log.span(), task = %key, error = %cause, "failing task");
        self.record(key, user, "deny", Some(cause.to_string()));

        let transition = PhaseTransition::failed(TaskPhase::Queued, message);
        if let Err(err) = self.writer.transition(key, transition.clone()).await {
            tracing::error!(parent: self.log.span(), task = %key, error = %err, "could not mark task failed, will retry");
            self.pending.lock().insert(key.clone(), transition);
        }
    }

    async fn retry_pending(&self, key: &NamespacedName, transition: PhaseTransition) -> ReconcileResult {
        tracing::info!(parent: self.log.span(), task = %key, to = %transition.target, "retrying pending phase write");
        match self.writer.transition(key, transition.clone()).await {
            Ok(_) => {
                self.pending.lock().remove(key);
                ReconcileResult::done()
            }
            Err(SchedulerError::PhaseMismatch { actual, .. }) => {
                // someone else moved the task on; nothing left to owe
                tracing::warn!(parent: self.log.span(), task = %key, phase = %actual, "dropping pending phase write");
                self.pending.lock().remove(key);
                ReconcileResult::done()
            }
            Err(err) => {
                tracing::error!(parent: self.log.span(), task = %key, error = %err, "pending phase write failed again");
                ReconcileResult::requeue(self.pending_retry_interval)
            }
        }
    }

    fn record(&self, key: &NamespacedName, user: &str, action: &str, payload: Option<String>) {
        if let Some(audit) = &self.audit {
            audit.record(build_audit_event(key, user, action, payload));
        }
    }
}

fn failure_message(cause: &SchedulerError) -> String {
    match cause {
        SchedulerError::NotFound { kind: "Budget", .. } => NO_BUDGET_MESSAGE.to_string(),
        SchedulerError::InsufficientBudget { .. } => INSUFFICIENT_BUDGET_MESSAGE.to_string(),
        other => other.to_string(),
    }
}

fn describe(result: &AdmitResult) -> String {
    format!("{}: {}/{}", result.budget, result.required(), result.ceiling)
}
