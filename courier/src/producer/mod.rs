//! Publishers sending [`Envelopes`](crate::Envelope) to topics
//!
//! - [`SyncPublisher`] waits for every record to be acknowledged and hands the outcome back
//! - [`AsyncPublisher`] only waits for the transport queue and reports outcomes through diagnostics
//!
//! Both serialize envelopes with the [json](crate::implementation::json) codec and refuse
//! to send anything if that fails.

mod async_publisher;
mod sync_publisher;

pub use async_publisher::*;
pub use sync_publisher::*;

use crate::diagnostics::{DiagnosticContext, DiagnosticEmitter};
use crate::implementation::json;
use crate::transport::Record;
use crate::{CourierError, Envelope};

/// Serializes an envelope into a record, reporting encoding failures as a diagnostic
fn prepare(
    diagnostics: &dyn DiagnosticEmitter,
    topic: &str,
    envelope: &Envelope,
    key: &str,
) -> Result<Record, CourierError> {
    match json::encode(envelope) {
        Ok(payload) => Ok(Record::new(topic, key, payload)),
        Err(error) => {
            let context = DiagnosticContext::default().with_topic(topic).with_key(key);
            diagnostics.error("Envelope could not be serialized", &error, &context);
            Err(error)
        }
    }
}
