//! Configuration models for the reconciler, writer, execution and workloads.

pub mod controller;

pub use controller::{
    ControllerConfig, ExecutionConfig, ReconcileConfig, WorkloadConfig, WriterConfig,
    CONFIG_PATH_ENV,
};
