//! Budget accounting and the admission verdict.
//!
//! A task is admitted when the user's budget covers the cost of every task
//! the user currently has `InProgress` plus the candidate's own cost. Queued
//! and Ready tasks do not count: the ceiling bounds what is executing, not
//! what is waiting.

use std::sync::Arc;

use crate::core::cost::evaluate;
use crate::core::resource::{Budget, Cost, Task};
use crate::core::store::ResourceStore;
use crate::core::SchedulerError;
use crate::util::telemetry::Logger;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmitResult {
    /// Name of the budget that was applied.
    pub budget: String,
    /// Budget ceiling.
    pub ceiling: f64,
    /// Summed cost of the user's running tasks.
    pub running_cost: f64,
    /// Number of running tasks that were summed.
    pub running_tasks: usize,
    /// Cost of the candidate task.
    pub candidate_cost: f64,
}

impl AdmitResult {
    /// Running cost plus candidate cost.
    #[must_use]
    pub fn required(&self) -> f64 {
        self.running_cost + self.candidate_cost
    }

    /// Whether the ceiling covers the required amount.
    #[must_use]
    pub fn admitted(&self) -> bool {
        self.ceiling >= self.required()
    }

    /// Turn a denial into [`SchedulerError::InsufficientBudget`].
    ///
    /// # Errors
    ///
    /// `InsufficientBudget` when the task is not admitted.
    pub fn into_verdict(self, task: &str) -> Result<Self, SchedulerError> {
        if self.admitted() {
            Ok(self)
        } else {
            Err(SchedulerError::InsufficientBudget {
                task: task.to_string(),
                required: self.required(),
                available: self.ceiling,
            })
        }
    }
}

/// Looks up budgets and costs and issues admission verdicts.
pub struct BudgetAccountant<S> {
    store: Arc<S>,
    log: Logger,
}

impl<S> Clone for BudgetAccountant<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            log: self.log.clone(),
        }
    }
}

impl<S: ResourceStore> BudgetAccountant<S> {
    /// Create an accountant reading from `store`.
    pub const fn new(store: Arc<S>, log: Logger) -> Self {
        Self { store, log }
    }

    /// First budget in `namespace` whose user matches.
    ///
    /// # Errors
    ///
    /// `NotFound` if the user has no budget; store errors are passed through.
    pub async fn budget_for_user(
        &self,
        user_id: &str,
        namespace: &str,
    ) -> Result<Budget, SchedulerError> {
        let budgets: Vec<Budget> = self.store.list(namespace).await?;
        budgets
            .into_iter()
            .find(|b| b.spec.user_id == user_id)
            .ok_or_else(|| SchedulerError::not_found("Budget", format!("uid {user_id}")))
    }

    /// Cost profile called `name` in `namespace`.
    ///
    /// # Errors
    ///
    /// `NotFound` if no such profile exists.
    pub async fn cost_with_name(&self, name: &str, namespace: &str) -> Result<Cost, SchedulerError> {
        let costs: Vec<Cost> = self.store.list(namespace).await?;
        costs
            .into_iter()
            .find(|c| c.metadata.name == name)
            .ok_or_else(|| SchedulerError::not_found("Cost", name))
    }

    /// The user's `InProgress` tasks in `namespace`.
    ///
    /// # Errors
    ///
    /// Store errors are passed through.
    pub async fn running_tasks_for_user(
        &self,
        user_id: &str,
        namespace: &str,
    ) -> Result<Vec<Task>, SchedulerError> {
        let tasks: Vec<Task> = self.store.list(namespace).await?;
        Ok(tasks
            .into_iter()
            .filter(|t| t.spec.user_id == user_id && t.status.phase.is_running())
            .inspect(|t| {
                tracing::debug!(parent: self.log.span(), task = %t.metadata.name, user = user_id, "found running task");
            })
            .collect())
    }

    /// Price the candidate against the user's budget.
    ///
    /// A denial is an `Ok` result with [`AdmitResult::admitted`] false.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing budget or a missing cost profile (the
    /// candidate's or a running task's); store errors are passed through.
    pub async fn admit(
        &self,
        task: &Task,
        user_id: &str,
        namespace: &str,
    ) -> Result<AdmitResult, SchedulerError> {
        let budget = self.budget_for_user(user_id, namespace).await?;
        tracing::info!(parent: self.log.span(), budget = %budget.metadata.name, user = user_id, "found budget");

        let candidate = self.cost_with_name(&task.spec.cost_profile, namespace).await?;
        let candidate_cost = evaluate(&candidate);
        tracing::debug!(parent: self.log.span(), cost = %candidate.metadata.name, total = candidate_cost, "priced candidate");

        let running = self.running_tasks_for_user(user_id, namespace).await?;
        let mut running_cost = 0.0;
        let mut running_tasks = 0;
        for other in running
            .iter()
            .filter(|t| t.metadata.name != task.metadata.name)
        {
            let cost = self.cost_with_name(&other.spec.cost_profile, namespace).await?;
            let total = evaluate(&cost);
            tracing::debug!(parent: self.log.span(), task = %other.metadata.name, cost = %cost.metadata.name, total, "priced running task");
            running_cost += total;
            running_tasks += 1;
        }

        let result = AdmitResult {
            budget: budget.metadata.name,
            ceiling: budget.spec.amount,
            running_cost,
            running_tasks,
            candidate_cost,
        };
        tracing::info!(
            parent: self.log.span(),
            task = %task.metadata.name,
            required = result.required(),
            ceiling = result.ceiling,
            admitted = result.admitted(),
            "admission verdict"
        );
        Ok(result)
    }
}
