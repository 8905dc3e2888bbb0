//! Serialization and deserialization provided by [`serde_json`] using marker traits
//!
//! Messages which provide raw access to their payload can implement [`JsonMessage`] to receive a
//! default [`EnvelopeMessage`] implementation. Publishers use [`encode`] directly. Swapping the wire
//! format only requires changing this module.

use crate::transport::{ConsumerMessage, EnvelopeMessage, RawMessage};
use crate::{CourierError, Envelope};
use tracing::{instrument, trace};

/// Marker trait providing a default [`EnvelopeMessage`] implementation based on [`serde_json`]
pub trait JsonMessage: RawMessage {}

impl<M> EnvelopeMessage for M
where
    M: JsonMessage,
{
    /// Parses the payload using [`serde_json::from_slice`]
    fn parse_envelope(&self) -> Result<Envelope, CourierError> {
        decode(self.payload())
    }
}

impl JsonMessage for ConsumerMessage {}

/// Serializes the envelope using [`serde_json::to_vec`]
#[instrument(level = "trace", skip(envelope), fields(id = envelope.id()))]
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CourierError> {
    trace!("Serializing envelope");
    serde_json::to_vec(envelope).map_err(CourierError::Serialization)
}

/// Deserializes an envelope using [`serde_json::from_slice`]
#[instrument(level = "trace", skip(payload), fields(length = payload.len()))]
pub fn decode(payload: &[u8]) -> Result<Envelope, CourierError> {
    trace!("Deserializing envelope");
    serde_json::from_slice(payload).map_err(CourierError::Decode)
}
