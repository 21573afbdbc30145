//! # Prometheus Budget Scheduler
//!
//! A budget-admission task scheduler built as a level-triggered reconciler over
//! a declarative resource store.
//!
//! Clients submit a `Task` that names a `Cost` profile and an owning user. The
//! reconciler claims the task, prices it, and admits it only when the user's
//! `Budget` covers everything that user already has running plus the new
//! task. Admitted tasks are handed to an execution supervisor and get an owned
//! `Workload`; denied tasks are marked `Failed` with a message.
//!
//! ## Key Pieces
//!
//! - **Budget Accountant**: sums the cost of a user's `InProgress` tasks against the ceiling
//! - **Task Writer**: one actor per task serializes every phase write
//! - **Execution Supervisor**: launched work is tracked by handle, awaitable and cancellable
//! - **Workload Materializer**: idempotent create-or-update of the owned workload
//! - **Resource Store**: async trait with optimistic concurrency; an in-memory backend ships
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_budget_scheduler::builders::build_simulated;
//! use prometheus_budget_scheduler::config::ControllerConfig;
//! use prometheus_budget_scheduler::core::{Budget, Cost, NamespacedName, Task};
//! use prometheus_budget_scheduler::infra::InMemoryStore;
//! use prometheus_budget_scheduler::runtime::TokioSpawner;
//!
//! let store = Arc::new(InMemoryStore::new());
//! store.insert(Budget::new("default", "alice-budget", "alice", 100.0))?;
//! store.insert(Cost::new("default", "small", [("compute", 5.0), ("priority", 2.0)]))?;
//! store.insert(Task::new("default", "train", "alice", "small"))?;
//!
//! let (reconciler, _audit) =
//!     build_simulated(&ControllerConfig::from_env()?, store, TokioSpawner::current())?;
//! reconciler.reconcile(&NamespacedName::new("default", "train")).await?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions, admission accounting and the task lifecycle.
pub mod core;
/// Configuration models for the controller and its components.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Infrastructure adapters for resource storage.
pub mod infra;
/// Runtime adapters.
pub mod runtime;
/// Shared utilities.
pub mod util;
