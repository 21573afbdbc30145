//! Error types for reconciler operations.

use thiserror::Error;

use crate::core::resource::TaskPhase;

/// Errors produced by reconciler components.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    /// A referenced Budget, Cost, Task or Workload does not exist.
    #[error("{kind} not found: {name}")]
    NotFound {
        /// Resource kind that was looked up.
        kind: &'static str,
        /// Name or key that was looked up.
        name: String,
    },
    /// Aggregate cost of running tasks plus the candidate exceeds the budget.
    #[error("task {task} does not have enough budget: requires {required}, budget is {available}")]
    InsufficientBudget {
        /// Candidate task name.
        task: String,
        /// Running total plus candidate cost.
        required: f64,
        /// Budget ceiling.
        available: f64,
    },
    /// Optimistic-concurrency check failed on update.
    #[error("conflict updating {kind} {name}: object has been modified")]
    PersistenceConflict {
        /// Resource kind being written.
        kind: &'static str,
        /// Object name.
        name: String,
    },
    /// Any other store failure.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    /// Create found an object with the same name.
    #[error("{kind} already exists: {name}")]
    AlreadyExists {
        /// Resource kind being created.
        kind: &'static str,
        /// Object name.
        name: String,
    },
    /// Stored phase differs from the phase the writer expected.
    #[error("phase mismatch: expected {expected}, found {actual}")]
    PhaseMismatch {
        /// Phase the caller read.
        expected: TaskPhase,
        /// Phase currently stored.
        actual: TaskPhase,
    },
    /// Transition is not an edge of the lifecycle state machine.
    #[error("invalid phase transition from {from} to {to}")]
    InvalidTransition {
        /// Current phase.
        from: TaskPhase,
        /// Requested phase.
        to: TaskPhase,
    },
    /// Object could not be encoded or decoded by the store.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Work was cancelled or its owner went away.
    #[error("cancelled")]
    Cancelled,
}

impl SchedulerError {
    /// Shorthand for [`SchedulerError::NotFound`].
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// True for [`SchedulerError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for [`SchedulerError::PersistenceConflict`].
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::PersistenceConflict { .. })
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
