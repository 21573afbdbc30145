//! Telemetry helpers for structured logging and tracing.
//!
//! Components do not log through an ambient global target. Each one is handed a
//! [`Logger`] at construction and emits its events with that handle's span as
//! the explicit parent, so a single reconciler instance can be told apart from
//! another one running in the same process.

use tracing::Span;

/// Initialize tracing/telemetry. Users can install their own subscriber; this
/// helper installs a default env-based subscriber if none is set.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Explicit logging handle passed into every component.
#[derive(Debug, Clone)]
pub struct Logger {
    span: Span,
}

impl Logger {
    /// Root handle for a named controller.
    #[must_use]
    pub fn new(controller: &str) -> Self {
        Self {
            span: tracing::info_span!("controller", name = %controller),
        }
    }

    /// Handle that discards its span; events still reach the subscriber.
    #[must_use]
    pub fn disabled() -> Self {
        Self { span: Span::none() }
    }

    /// Child handle scoped to one component.
    #[must_use]
    pub fn component(&self, component: &'static str) -> Self {
        Self {
            span: tracing::info_span!(parent: &self.span, "component", name = component),
        }
    }

    /// Span that events from this handle are attached to.
    #[must_use]
    pub const fn span(&self) -> &Span {
        &self.span
    }
}
