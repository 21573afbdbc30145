//! End-to-end admission scenarios against the in-memory store.
//!
//! Covers:
//! 1. Admission within budget and the full phase progression
//! 2. Denial over budget
//! 3. Missing budget
//! 4. Re-delivery of settled and observed tasks
//! 5. Workload events mapped back to their task

mod common;

use common::{harness, NS};
use prometheus_budget_scheduler::core::reconciler::{
    INSUFFICIENT_BUDGET_MESSAGE, NO_BUDGET_MESSAGE,
};
use prometheus_budget_scheduler::core::{
    owning_task, Budget, ExecutionOutcome, NamespacedName, Resource, ResourceStore,
    SchedulerError, Task, TaskPhase, Workload,
};

#[tokio::test]
async fn test_admitted_task_runs_to_complete() {
    let h = harness();
    h.budget("alice", 100.0);
    h.cost("big", &[("compute", 10.0), ("priority", 6.0)]);
    h.cost("small", &[("compute", 5.0), ("priority", 2.0)]);
    h.running_task("running", "alice", "big");
    let task = h.task("new", "alice", "small");

    let result = h.reconciler.reconcile(&task.key()).await.unwrap();
    assert!(result.requeue_after.is_none());

    // execution is blocked on the gate, so the task must sit in InProgress
    assert!(h.wait_for_phase("new", TaskPhase::InProgress).await);
    let workload: Workload = h.store.get(NS, "new-deployment").await.unwrap().unwrap();
    assert_eq!(owning_task(&workload), Some(task.key()));

    h.executor.open(1);
    assert_eq!(
        h.reconciler.supervisor().wait(&task.key()).await,
        Some(ExecutionOutcome::Completed)
    );
    assert_eq!(h.stored("new").await.status.phase, TaskPhase::Complete);
    assert_eq!(
        h.phase_writes("new"),
        vec!["Queued", "Ready", "InProgress", "Complete"]
    );
    assert_eq!(h.executor.executed(), vec!["new"]);

    let actions = h.audit.actions_for(&task.key());
    assert!(actions.contains(&"admit".to_string()));
    assert!(actions.contains(&"workload-create".to_string()));
}

#[tokio::test]
async fn test_over_budget_task_is_failed() {
    let h = harness();
    h.budget("alice", 100.0);
    h.cost("heavy", &[("compute", 95.0), ("priority", 1.0)]);
    h.cost("small", &[("compute", 5.0), ("priority", 2.0)]);
    h.running_task("running", "alice", "heavy");
    let task = h.task("new", "alice", "small");

    let err = h.reconciler.reconcile(&task.key()).await.unwrap_err();
    match err {
        SchedulerError::InsufficientBudget {
            required,
            available,
            ..
        } => {
            assert!((required - 105.0).abs() < f64::EPSILON);
            assert!((available - 100.0).abs() < f64::EPSILON);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let stored = h.stored("new").await;
    assert_eq!(stored.status.phase, TaskPhase::Failed);
    assert_eq!(stored.status.message.as_deref(), Some(INSUFFICIENT_BUDGET_MESSAGE));
    assert!(h.store.get::<Workload>(NS, "new-deployment").await.unwrap().is_none());
    assert!(h.reconciler.supervisor().running().is_empty());
    assert!(h.reconciler.pending().is_empty());
}

#[tokio::test]
async fn test_task_without_budget_is_failed() {
    let h = harness();
    h.cost("small", &[("compute", 5.0), ("priority", 2.0)]);
    let task = h.task("orphan", "nobody", "small");

    let err = h.reconciler.reconcile(&task.key()).await.unwrap_err();
    assert!(err.is_not_found());
    let stored = h.stored("orphan").await;
    assert_eq!(stored.status.phase, TaskPhase::Failed);
    assert_eq!(stored.status.message.as_deref(), Some(NO_BUDGET_MESSAGE));
    assert_eq!(h.phase_writes("orphan"), vec!["Queued", "Failed"]);
}

#[tokio::test]
async fn test_zero_priority_cost_is_free() {
    let h = harness();
    h.budget("alice", 1.0);
    h.cost("unprioritized", &[("compute", 1_000.0), ("memory", 64.0)]);
    let task = h.task("free", "alice", "unprioritized");

    h.reconciler.reconcile(&task.key()).await.unwrap();
    assert!(h.wait_for_phase("free", TaskPhase::InProgress).await);
    h.executor.open(1);
}

#[tokio::test]
async fn test_redelivery_after_complete_changes_nothing() {
    let h = harness();
    h.budget("alice", 100.0);
    h.cost("small", &[("compute", 5.0), ("priority", 2.0)]);
    let task = h.task("done", "alice", "small");

    h.reconciler.reconcile(&task.key()).await.unwrap();
    h.executor.open(1);
    h.reconciler.supervisor().wait(&task.key()).await;
    assert_eq!(h.stored("done").await.status.phase, TaskPhase::Complete);

    let task_writes = h.store.write_count::<Task>();
    let workload_writes = h.store.write_count::<Workload>();
    let events = h.audit.events().len();

    for _ in 0..3 {
        let result = h.reconciler.reconcile(&task.key()).await.unwrap();
        assert!(result.requeue_after.is_none());
    }
    assert_eq!(h.store.write_count::<Task>(), task_writes);
    assert_eq!(h.store.write_count::<Workload>(), workload_writes);
    assert_eq!(h.audit.events().len(), events);
    assert!(!h.reconciler.supervisor().is_running(&task.key()));
}

#[tokio::test]
async fn test_failed_task_is_not_repriced_when_budget_grows() {
    let h = harness();
    h.budget("alice", 1.0);
    h.cost("small", &[("compute", 5.0), ("priority", 2.0)]);
    let task = h.task("t1", "alice", "small");
    assert!(h.reconciler.reconcile(&task.key()).await.is_err());

    let mut budget = h
        .store
        .get::<Budget>(NS, "alice-budget")
        .await
        .unwrap()
        .unwrap();
    budget.spec.amount = 1_000.0;
    h.store.update(&budget).await.unwrap();

    h.reconciler.reconcile(&task.key()).await.unwrap();
    assert_eq!(h.stored("t1").await.status.phase, TaskPhase::Failed);
}

#[tokio::test]
async fn test_workload_event_maps_to_noop_reconcile() {
    let h = harness();
    h.budget("alice", 100.0);
    h.cost("small", &[("compute", 5.0), ("priority", 2.0)]);
    let task = h.task("t1", "alice", "small");
    h.reconciler.reconcile(&task.key()).await.unwrap();

    let workload: Workload = h.store.get(NS, "t1-deployment").await.unwrap().unwrap();
    let key = owning_task(&workload).unwrap();
    assert_eq!(key, NamespacedName::new(NS, "t1"));

    let writes = h.store.write_count::<Workload>();
    h.reconciler.reconcile(&key).await.unwrap();
    assert_eq!(h.store.write_count::<Workload>(), writes);
    h.executor.open(1);
}

#[tokio::test]
async fn test_deleted_task_is_ignored() {
    let h = harness();
    h.budget("alice", 100.0);
    let task = h.task("gone", "alice", "small");
    assert!(h.store.delete::<Task>(NS, "gone"));

    let result = h.reconciler.reconcile(&task.key()).await.unwrap();
    assert!(result.requeue_after.is_none());
    assert_eq!(h.reconciler.writer().active_actors(), 0);
}
