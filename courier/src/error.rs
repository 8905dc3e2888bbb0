use crate::BoxedError;
use thiserror::Error;

/// Errors surfaced by the publishers and the consumer group
#[derive(Debug, Error)]
pub enum CourierError {
    /// Connection to the brokers could not be established during construction.
    ///
    /// This is unrecoverable, callers are expected to stop the process.
    #[error("unable to connect to brokers {hosts:?}")]
    Connection {
        /// Hosts which have been tried
        hosts: Vec<String>,
        /// Reason reported by the transport
        #[source]
        source: BoxedError,
    },

    /// Envelope could not be converted into its wire representation
    #[error("failed to serialize envelope")]
    Serialization(#[source] serde_json::Error),

    /// Wire payload could not be converted into an envelope
    #[error("failed to decode envelope")]
    Decode(#[source] serde_json::Error),

    /// Transport refused or failed to send a record
    #[error("transport failed to send record")]
    Transport(#[source] BoxedError),

    /// Background outcome streams of the transport have already been handed to someone else
    #[error("background reports of the transport have already been taken")]
    ReportsTaken,

    /// Transport reported an error while shutting down
    #[error("transport failed to close")]
    Close(#[source] BoxedError),
}

impl CourierError {
    /// Whether the error may not be recovered from
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}
