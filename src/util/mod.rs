//! Shared utilities: wall clock and telemetry.

pub mod clock;
pub mod telemetry;

pub use clock::*;
pub use telemetry::*;
