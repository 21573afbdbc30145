//! Builders to construct a task reconciler from configuration.

use std::sync::Arc;

use anyhow::anyhow;

use crate::config::{ControllerConfig, ExecutionConfig};
use crate::core::{
    AppResult, AuditSink, BudgetAccountant, ExecutionSupervisor, InMemoryAuditSink,
    ResourceStore, SchedulerError, SimulatedExecutor, Spawn, TaskExecutor, TaskReconciler,
    TaskWriter, WorkloadMaterializer,
};
use crate::util::telemetry::Logger;

/// Build a reconciler from controller configuration using the provided
/// executor factory.
///
/// Every component shares `store` and `spawner` and gets a child of one
/// root [`Logger`] named after the controller; the factory is handed the
/// executor's child.
///
/// # Errors
///
/// Fails if the configuration is invalid or the executor factory fails.
pub fn build_reconciler<S, Sp, E, FE>(
    cfg: &ControllerConfig,
    store: Arc<S>,
    spawner: Sp,
    executor_factory: FE,
    audit: Option<Arc<dyn AuditSink>>,
) -> AppResult<TaskReconciler<S, Sp, E>>
where
    S: ResourceStore,
    Sp: Spawn + Clone,
    E: TaskExecutor,
    FE: FnOnce(&ExecutionConfig, Logger) -> Result<E, SchedulerError>,
{
    cfg.validate().map_err(|e| anyhow!("config invalid: {e}"))?;

    let log = Logger::new(&cfg.name);
    let executor = executor_factory(&cfg.execution, log.component("executor"))?;

    let writer = TaskWriter::new(
        Arc::clone(&store),
        spawner.clone(),
        cfg.writer.max_write_attempts,
        audit.clone(),
        log.component("writer"),
    );
    let supervisor = ExecutionSupervisor::new(
        writer.clone(),
        executor,
        spawner,
        log.component("execution"),
    );
    let materializer = WorkloadMaterializer::new(
        Arc::clone(&store),
        cfg.workload.clone(),
        audit.clone(),
        log.component("workload"),
    );
    let accountant = BudgetAccountant::new(Arc::clone(&store), log.component("budget"));

    tracing::info!(parent: log.span(), max_write_attempts = cfg.writer.max_write_attempts, "reconciler built");
    Ok(TaskReconciler::new(
        store,
        accountant,
        writer,
        supervisor,
        materializer,
        cfg.reconcile.pending_retry_interval(),
        audit,
        log,
    ))
}

/// Build a reconciler backed by [`SimulatedExecutor`] with an in-memory audit
/// buffer sized from the configuration.
///
/// # Errors
///
/// Fails if the configuration is invalid.
pub fn build_simulated<S, Sp>(
    cfg: &ControllerConfig,
    store: Arc<S>,
    spawner: Sp,
) -> AppResult<(TaskReconciler<S, Sp, SimulatedExecutor>, InMemoryAuditSink)>
where
    S: ResourceStore,
    Sp: Spawn + Clone,
{
    let audit = InMemoryAuditSink::new(cfg.audit_capacity);
    let reconciler = build_reconciler(
        cfg,
        store,
        spawner,
        |exec, log| Ok(SimulatedExecutor::new(exec.simulated_duration(), log)),
        Some(Arc::new(audit.clone())),
    )?;
    Ok((reconciler, audit))
}
