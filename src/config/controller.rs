//! Controller configuration structures.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Environment variable naming a JSON config file.
pub const CONFIG_PATH_ENV: &str = "BUDGET_SCHEDULER_CONFIG";

/// Execution unit settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// How long the simulated executor runs a task, in milliseconds.
    pub simulated_duration_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            simulated_duration_ms: 100_000,
        }
    }
}

impl ExecutionConfig {
    /// Simulated run time.
    #[must_use]
    pub const fn simulated_duration(&self) -> Duration {
        Duration::from_millis(self.simulated_duration_ms)
    }
}

/// Phase writer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Attempts per phase write when the store reports a version conflict.
    pub max_write_attempts: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: 3,
        }
    }
}

/// Reconcile loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Requeue delay after a pending phase write fails again, in milliseconds.
    pub pending_retry_interval_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            pending_retry_interval_ms: 5_000,
        }
    }
}

impl ReconcileConfig {
    /// Requeue delay for pending writes.
    #[must_use]
    pub const fn pending_retry_interval(&self) -> Duration {
        Duration::from_millis(self.pending_retry_interval_ms)
    }
}

/// Template for the workload materialized per admitted task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Appended to the task name to form the workload name.
    pub name_suffix: String,
    /// Label key used in the selector and pod template.
    pub selector_label: String,
    /// Container name.
    pub container_name: String,
    /// Container image.
    pub image: String,
    /// Replica count.
    pub replicas: u32,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            name_suffix: "-deployment".into(),
            selector_label: "deployment".into(),
            container_name: "nginx".into(),
            image: "nginx".into(),
            replicas: 1,
        }
    }
}

/// Root controller configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Controller name used for the root logging span.
    pub name: String,
    /// Execution settings.
    pub execution: ExecutionConfig,
    /// Writer settings.
    pub writer: WriterConfig,
    /// Reconcile settings.
    pub reconcile: ReconcileConfig,
    /// Workload template.
    pub workload: WorkloadConfig,
    /// Capacity of the in-memory audit buffer.
    pub audit_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: "task-controller".into(),
            execution: ExecutionConfig::default(),
            writer: WriterConfig::default(),
            reconcile: ReconcileConfig::default(),
            workload: WorkloadConfig::default(),
            audit_capacity: 1024,
        }
    }
}

impl WorkloadConfig {
    /// Validate workload template values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first empty field.
    pub fn validate(&self) -> Result<(), String> {
        for (field, value) in [
            ("selector_label", &self.selector_label),
            ("container_name", &self.container_name),
            ("image", &self.image),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{field} must not be empty"));
            }
        }
        Ok(())
    }
}

impl ControllerConfig {
    /// Validate all sections.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending section and field.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if self.execution.simulated_duration_ms == 0 {
            return Err("execution.simulated_duration_ms must be greater than 0".into());
        }
        if self.writer.max_write_attempts == 0 {
            return Err("writer.max_write_attempts must be greater than 0".into());
        }
        if self.reconcile.pending_retry_interval_ms == 0 {
            return Err("reconcile.pending_retry_interval_ms must be greater than 0".into());
        }
        if self.audit_capacity == 0 {
            return Err("audit_capacity must be greater than 0".into());
        }
        self.workload
            .validate()
            .map_err(|e| format!("workload invalid: {e}"))
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and validate a JSON config file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json_str(&raw).map_err(|e| anyhow::anyhow!("config {}: {e}", path.display()))
    }

    /// Load `.env`, then read the file named by [`CONFIG_PATH_ENV`], falling
    /// back to defaults when the variable is unset.
    ///
    /// # Errors
    ///
    /// Fails if an existing `.env` is malformed or the named file cannot be
    /// loaded. A missing `.env` is not an error.
    pub fn from_env() -> AppResult<Self> {
        check_dotenv(dotenvy::dotenv())?;
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(path),
            Err(_) => {
                tracing::debug!(parent: None, "{CONFIG_PATH_ENV} not set, using default config");
                Ok(Self::default())
            }
        }
    }
}

fn check_dotenv<T>(loaded: Result<T, dotenvy::Error>) -> AppResult<()> {
    match loaded {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(err).context("loading .env"),
    }
}
