//! Core scheduling abstractions, admission accounting and the task lifecycle.

pub mod audit;
pub mod budget;
pub mod cost;
pub mod error;
pub mod execution;
pub mod executor;
pub mod lifecycle;
pub mod reconciler;
pub mod resource;
pub mod store;
pub mod workload;
pub mod writer;

pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink};
pub use budget::{AdmitResult, BudgetAccountant};
pub use cost::evaluate;
pub use error::{AppResult, SchedulerError};
pub use execution::{ExecutionHandle, ExecutionOutcome, ExecutionSupervisor};
pub use executor::{SimulatedExecutor, Spawn, TaskExecutor};
pub use lifecycle::PhaseTransition;
pub use reconciler::{ReconcileResult, TaskReconciler};
pub use resource::{
    Budget, Cost, NamespacedName, ObjectMeta, OwnerReference, Resource, Task, TaskPhase,
    Workload,
};
pub use store::ResourceStore;
pub use workload::{desired_workload, owning_task, ConvergeOutcome, WorkloadMaterializer};
pub use writer::TaskWriter;
