//! Structured diagnostic events emitted by publishers and consumers
//!
//! Since per-message failures are absorbed by the layer they occur in, the diagnostic
//! stream is the only place where they become visible. Every event carries a
//! [`DiagnosticContext`] describing the operation it belongs to.
//!
//! Emitters never return errors back into the caller. The default [`TracingEmitter`]
//! forwards everything to [`tracing`] while the [`RecordingEmitter`] retains all events
//! in memory so they can be inspected later on.

mod context;
mod recorder;
mod tracing_emitter;

pub use context::*;
pub use recorder::*;
pub use tracing_emitter::*;

use std::error::Error;
use std::fmt;

/// Severity of a diagnostic event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Detailed progress information
    Debug,
    /// Lifecycle information
    Info,
    /// Recoverable failure, the operation continues
    Error,
    /// Unrecoverable failure during initialization
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "debug"),
            Severity::Info => write!(f, "info"),
            Severity::Error => write!(f, "error"),
            Severity::Fatal => write!(f, "fatal"),
        }
    }
}

/// Sink for leveled diagnostic events with structured context
pub trait DiagnosticEmitter: Send + Sync {
    /// Initialization failed and the process can not continue
    fn fatal(&self, message: &str, error: &(dyn Error + 'static), context: &DiagnosticContext);

    /// An operation failed but processing continues
    fn error(&self, message: &str, error: &(dyn Error + 'static), context: &DiagnosticContext);

    /// Lifecycle event
    fn info(&self, message: &str, context: &DiagnosticContext);

    /// Detailed progress event
    fn debug(&self, message: &str, context: &DiagnosticContext);
}
