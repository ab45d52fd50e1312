//! Error reporting collaborator.
//!
//! Derived-state, transport and persistence errors are never raised to
//! callers; they are handed to a [`Reporter`] together with the record that
//! triggered them, serialized as JSON context. The default implementation
//! logs through `tracing`.

use std::error::Error;

/// Sink for errors the system absorbs instead of propagating.
pub trait Reporter: Send + Sync {
    /// Report an error raised inside `component`, with the offending
    /// record as JSON context when one exists.
    fn error(&self, component: &str, error: &(dyn Error + 'static), context: Option<&serde_json::Value>);
}

/// Reporter that forwards everything to the `tracing` error level.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn error(&self, component: &str, error: &(dyn Error + 'static), context: Option<&serde_json::Value>) {
        match context {
            Some(context) => tracing::error!(component, %context, "{error}"),
            None => tracing::error!(component, "{error}"),
        }
    }
}
