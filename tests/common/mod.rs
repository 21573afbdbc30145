//! Shared fixtures for the integration tests.

#![allow(dead_code, missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use prometheus_budget_scheduler::builders::build_reconciler;
use prometheus_budget_scheduler::config::ControllerConfig;
use prometheus_budget_scheduler::core::{
    Budget, Cost, InMemoryAuditSink, Task, TaskExecutor, TaskPhase, TaskReconciler,
};
use prometheus_budget_scheduler::infra::InMemoryStore;
use prometheus_budget_scheduler::runtime::TokioSpawner;
use tokio::sync::Semaphore;

pub const NS: &str = "default";

/// Executor that blocks each task until the test opens the gate.
#[derive(Clone)]
pub struct GatedExecutor {
    gate: Arc<Semaphore>,
    executed: Arc<Mutex<Vec<String>>>,
}

impl GatedExecutor {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn open(&self, permits: usize) {
        self.gate.add_permits(permits);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl TaskExecutor for GatedExecutor {
    async fn execute(&self, task: Task) {
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.executed.lock().push(task.metadata.name);
    }
}

pub type Reconciler = TaskReconciler<InMemoryStore, TokioSpawner, GatedExecutor>;

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub reconciler: Reconciler,
    pub executor: GatedExecutor,
    pub audit: InMemoryAuditSink,
}

pub fn config() -> ControllerConfig {
    let mut cfg = ControllerConfig::default();
    cfg.name = "test-controller".into();
    cfg.reconcile.pending_retry_interval_ms = 25;
    cfg
}

pub fn harness() -> Harness {
    harness_with(&config())
}

pub fn harness_with(cfg: &ControllerConfig) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let executor = GatedExecutor::new();
    let audit = InMemoryAuditSink::new(cfg.audit_capacity);
    let reconciler = build_reconciler(
        cfg,
        Arc::clone(&store),
        TokioSpawner::current(),
        {
            let executor = executor.clone();
            move |_, _| Ok(executor)
        },
        Some(Arc::new(audit.clone())),
    )
    .unwrap();
    Harness {
        store,
        reconciler,
        executor,
        audit,
    }
}

impl Harness {
    pub fn budget(&self, user: &str, amount: f64) {
        self.store
            .insert(Budget::new(NS, format!("{user}-budget"), user, amount))
            .unwrap();
    }

    pub fn cost(&self, name: &str, resources: &[(&str, f64)]) {
        self.store
            .insert(Cost::new(NS, name, resources.iter().copied()))
            .unwrap();
    }

    pub fn task(&self, name: &str, user: &str, cost: &str) -> Task {
        self.store.insert(Task::new(NS, name, user, cost)).unwrap()
    }

    pub fn running_task(&self, name: &str, user: &str, cost: &str) -> Task {
        self.store
            .insert(Task::new(NS, name, user, cost).with_phase(TaskPhase::InProgress))
            .unwrap()
    }

    pub async fn stored(&self, name: &str) -> Task {
        use prometheus_budget_scheduler::core::ResourceStore;
        self.store.get::<Task>(NS, name).await.unwrap().unwrap()
    }

    pub async fn wait_for_phase(&self, name: &str, phase: TaskPhase) -> bool {
        for _ in 0..400 {
            if self.stored(name).await.status.phase == phase {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    /// Phases written for a task, in write order.
    pub fn phase_writes(&self, name: &str) -> Vec<String> {
        let task = format!("{NS}/{name}");
        self.audit
            .events()
            .into_iter()
            .filter(|e| e.task == task && e.action == "phase")
            .filter_map(|e| e.payload)
            .collect()
    }
}
