use super::{DiagnosticContext, DiagnosticEmitter, Severity};
use crate::helpers::lock;
use std::error::Error;
use std::sync::{Arc, Mutex};

/// Single event retained by the [`RecordingEmitter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Level the event has been emitted at
    pub severity: Severity,
    /// Human readable description
    pub message: String,
    /// Rendered error, present for [`Severity::Error`] and [`Severity::Fatal`]
    pub error: Option<String>,
    /// Context attached to the event
    pub context: DiagnosticContext,
}

/// [`DiagnosticEmitter`] which keeps every event in memory
///
/// Clones share the same underlying storage, so one handle can be passed to a
/// publisher or consumer while another one is used to inspect the events.
#[derive(Debug, Clone, Default)]
pub struct RecordingEmitter {
    events: Arc<Mutex<Vec<Diagnostic>>>,
}

impl RecordingEmitter {
    /// Copy of every event recorded so far
    pub fn events(&self) -> Vec<Diagnostic> {
        lock(&self.events).clone()
    }

    /// Events with the given severity and message
    pub fn matching(&self, severity: Severity, message: &str) -> Vec<Diagnostic> {
        self.events()
            .into_iter()
            .filter(|event| event.severity == severity && event.message == message)
            .collect()
    }

    /// Number of events with the given severity and message
    pub fn count(&self, severity: Severity, message: &str) -> usize {
        self.matching(severity, message).len()
    }

    fn record(
        &self,
        severity: Severity,
        message: &str,
        error: Option<&(dyn Error + 'static)>,
        context: &DiagnosticContext,
    ) {
        let event = Diagnostic {
            severity,
            message: message.to_owned(),
            error: error.map(ToString::to_string),
            context: context.clone(),
        };

        lock(&self.events).push(event);
    }
}

impl DiagnosticEmitter for RecordingEmitter {
    fn fatal(&self, message: &str, error: &(dyn Error + 'static), context: &DiagnosticContext) {
        self.record(Severity::Fatal, message, Some(error), context);
    }

    fn error(&self, message: &str, error: &(dyn Error + 'static), context: &DiagnosticContext) {
        self.record(Severity::Error, message, Some(error), context);
    }

    fn info(&self, message: &str, context: &DiagnosticContext) {
        self.record(Severity::Info, message, None, context);
    }

    fn debug(&self, message: &str, context: &DiagnosticContext) {
        self.record(Severity::Debug, message, None, context);
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::CourierError;

    #[test]
    fn share_events_between_clones() {
        let recorder = RecordingEmitter::default();
        let emitter: Box<dyn DiagnosticEmitter> = Box::new(recorder.clone());
        let context = DiagnosticContext::default().with_topic("sessions");

        emitter.debug("Envelope delivered", &context);
        emitter.error(
            "Delivery failed",
            &CourierError::Transport("broker gone".into()),
            &context,
        );

        assert_eq!(recorder.events().len(), 2);
        assert_eq!(recorder.count(Severity::Debug, "Envelope delivered"), 1);

        let failure = &recorder.matching(Severity::Error, "Delivery failed")[0];
        assert_eq!(failure.error.as_deref(), Some("transport failed to send record"));
        assert_eq!(failure.context, context);
    }
}
