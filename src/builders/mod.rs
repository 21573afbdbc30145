//! Builders to construct scheduler components from configuration.

pub mod reconciler_builder;

pub use reconciler_builder::{build_reconciler, build_simulated};
