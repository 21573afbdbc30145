//! Task execution backends and the runtime spawn seam.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::core::resource::Task;
use crate::util::telemetry::Logger;

/// Abstraction for spawning work on a runtime.
///
/// Unlike a fire-and-forget spawn, the returned handle lets the caller observe
/// completion or abort the work.
pub trait Spawn: Send + Sync + 'static {
    /// Spawn a future and return its join handle.
    fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;
}

/// Abstraction for running an admitted task.
///
/// The executor only performs the work; phase bookkeeping around it is done
/// by the execution supervisor.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_budget_scheduler::core::{Task, TaskExecutor};
///
/// #[derive(Clone)]
/// struct JobRunner;
///
/// #[async_trait]
/// impl TaskExecutor for JobRunner {
///     async fn execute(&self, task: Task) {
///         run_job(&task.metadata.name).await;
///     }
/// }
/// ```
#[async_trait]
pub trait TaskExecutor: Send + Sync + Clone + 'static {
    /// Run the task to completion.
    async fn execute(&self, task: Task);
}

/// Placeholder backend that sleeps for a fixed interval.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    duration: Duration,
    log: Logger,
}

impl SimulatedExecutor {
    /// Executor whose every run takes `duration`.
    #[must_use]
    pub const fn new(duration: Duration, log: Logger) -> Self {
        Self { duration, log }
    }

    /// Configured run time.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(&self, task: Task) {
        tracing::debug!(parent: self.log.span(), task = %task.metadata.name, duration_ms = self.duration.as_millis(), "simulating task run");
        tokio::time::sleep(self.duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::telemetry::capture::CapturedEvents;
    use std::time::Instant;

    #[tokio::test]
    async fn test_simulated_executor_waits() {
        let exec = SimulatedExecutor::new(Duration::from_millis(20), Logger::disabled());
        let start = Instant::now();
        exec.execute(Task::new("ns", "t", "u", "c")).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_run_event_is_attached_to_logger_span() {
        let events = CapturedEvents::default();
        let _guard = events.install();
        let log = Logger::new("task-controller").component("executor");
        let exec = SimulatedExecutor::new(Duration::from_millis(1), log);

        exec.execute(Task::new("ns", "t", "u", "c")).await;
        assert_eq!(
            events.parent_of("simulating task run"),
            Some(Some("component".to_string()))
        );
    }
}
