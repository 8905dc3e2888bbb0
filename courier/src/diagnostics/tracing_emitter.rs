use super::{DiagnosticContext, DiagnosticEmitter};
use std::error::Error;

macro_rules! emit {
    ($level:ident, $message:expr, $context:expr $(, $($fields:tt)+)?) => {
        tracing::event!(
            tracing::Level::$level,
            payload = $context.payload(),
            topics = ?$context.topics(),
            hosts = ?$context.hosts(),
            key = $context.key(),
            group_id = $context.group_id(),
            partition = $context.partition(),
            offset = $context.offset(),
            $($($fields)+,)?
            "{}",
            $message
        )
    };
}

/// [`DiagnosticEmitter`] forwarding to [`tracing`]
///
/// Every field of the [`DiagnosticContext`] is recorded as a structured field.
/// There is no fatal level in [`tracing`], fatal events are recorded as errors
/// with an additional `fatal = true` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEmitter;

impl DiagnosticEmitter for TracingEmitter {
    fn fatal(&self, message: &str, error: &(dyn Error + 'static), context: &DiagnosticContext) {
        emit!(ERROR, message, context, error = %error, fatal = true);
    }

    fn error(&self, message: &str, error: &(dyn Error + 'static), context: &DiagnosticContext) {
        emit!(ERROR, message, context, error = %error);
    }

    fn info(&self, message: &str, context: &DiagnosticContext) {
        emit!(INFO, message, context);
    }

    fn debug(&self, message: &str, context: &DiagnosticContext) {
        emit!(DEBUG, message, context);
    }
}
