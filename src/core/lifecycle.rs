//! Task lifecycle state machine.
//!
//! ```text
//! <none> -> Queued -> Ready -> InProgress -> Complete
//!    \         |        |
//!     `--------+--------+-----> Failed
//! ```
//!
//! `Complete` and `Failed` are terminal. Every phase write is checked against
//! this table before it reaches the store.

use crate::core::resource::{Task, TaskPhase};
use crate::core::SchedulerError;

impl TaskPhase {
    /// Whether `self -> next` is an edge of the lifecycle.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Queued)
                | (Self::Queued, Self::Ready)
                | (Self::Ready, Self::InProgress)
                | (Self::InProgress, Self::Complete)
                | (Self::Pending | Self::Queued | Self::Ready, Self::Failed)
        )
    }

    /// Terminal phases; settled tasks are never re-admitted or re-priced.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Whether the reconciler has already taken ownership of the task.
    #[must_use]
    pub const fn is_observed(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Only executing tasks count against a budget.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::InProgress)
    }
}

/// A compare-and-set phase change requested by a writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTransition {
    /// Phase the caller observed.
    pub expected: TaskPhase,
    /// Phase to write.
    pub target: TaskPhase,
    /// Status message to record alongside the phase.
    pub message: Option<String>,
}

impl PhaseTransition {
    /// Transition without a message.
    #[must_use]
    pub const fn new(expected: TaskPhase, target: TaskPhase) -> Self {
        Self {
            expected,
            target,
            message: None,
        }
    }

    /// `expected -> Failed` carrying a reason.
    pub fn failed(expected: TaskPhase, message: impl Into<String>) -> Self {
        Self {
            expected,
            target: TaskPhase::Failed,
            message: Some(message.into()),
        }
    }

    /// Apply to a freshly read task, validating the current phase and edge.
    ///
    /// # Errors
    ///
    /// `PhaseMismatch` if the stored phase is not `expected`;
    /// `InvalidTransition` if `expected -> target` is not an edge.
    pub fn apply(&self, task: &mut Task) -> Result<(), SchedulerError> {
        let actual = task.status.phase;
        if actual != self.expected {
            return Err(SchedulerError::PhaseMismatch {
                expected: self.expected,
                actual,
            });
        }
        if !actual.can_transition_to(self.target) {
            return Err(SchedulerError::InvalidTransition {
                from: actual,
                to: self.target,
            });
        }
        task.status.phase = self.target;
        if self.message.is_some() {
            task.status.message.clone_from(&self.message);
        }
        Ok(())
    }
}
