use crate::diagnostics::DiagnosticContext;
use crate::BoxedError;
use chrono::{DateTime, Utc};

/// Outgoing message addressed to a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Topic the record is sent to
    pub topic: String,
    /// Key used by the transport to pick a partition
    pub key: String,
    /// Serialized envelope
    pub payload: Vec<u8>,
}

impl Record {
    /// Creates a new instance from raw parts
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
        }
    }

    /// Diagnostic context describing this record
    pub fn context(&self) -> DiagnosticContext {
        DiagnosticContext::default()
            .with_topic(self.topic.as_str())
            .with_key(self.key.as_str())
            .with_payload(&self.payload)
    }
}

/// Location at which the broker stored a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Placement {
    /// Partition of the topic
    pub partition: i32,
    /// Position within the partition, monotonically increasing
    pub offset: i64,
}

/// Record which has been acknowledged by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Record that has been sent
    pub record: Record,
    /// Where it ended up
    pub placement: Placement,
}

impl Delivery {
    /// Diagnostic context describing this delivery
    pub fn context(&self) -> DiagnosticContext {
        self.record
            .context()
            .with_position(self.placement.partition, self.placement.offset)
    }
}

/// Record which could not be delivered
#[derive(Debug)]
pub struct DeliveryFailure {
    /// Record that has been sent
    pub record: Record,
    /// Partition the transport attempted to send to, if it got that far
    pub partition: Option<i32>,
    /// Offset reported along with the failure, brokers rarely assign one to a rejected record
    pub offset: Option<i64>,
    /// Reason for the failure
    pub error: BoxedError,
}

impl DeliveryFailure {
    /// Diagnostic context describing this failure
    pub fn context(&self) -> DiagnosticContext {
        let context = self.record.context();

        match (self.partition, self.offset) {
            (Some(partition), Some(offset)) => context.with_position(partition, offset),
            (Some(partition), None) => context.with_partition(partition),
            (None, _) => context,
        }
    }
}

/// Message received from a partition claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerMessage {
    /// Topic the message has been read from
    pub topic: String,
    /// Partition the message has been read from
    pub partition: i32,
    /// Position of the message within the partition
    pub offset: i64,
    /// Key the message has been sent with
    pub key: String,
    /// Raw wire payload
    pub payload: Vec<u8>,
    /// Time at which the broker stored the message
    pub timestamp: DateTime<Utc>,
}

impl ConsumerMessage {
    /// Diagnostic context describing this message
    pub fn context(&self) -> DiagnosticContext {
        DiagnosticContext::default()
            .with_topic(self.topic.as_str())
            .with_key(self.key.as_str())
            .with_position(self.partition, self.offset)
            .with_payload(&self.payload)
    }
}

/// Message providing access to its raw wire payload
pub trait RawMessage {
    /// Payload of the message
    fn payload(&self) -> &[u8];
}

/// Message whose payload can be decoded into an [`Envelope`](crate::Envelope)
pub trait EnvelopeMessage: RawMessage {
    /// Attempts to parse the wire-format payload into an envelope
    fn parse_envelope(&self) -> Result<crate::Envelope, crate::CourierError>;
}

impl RawMessage for ConsumerMessage {
    fn payload(&self) -> &[u8] {
        &self.payload
    }
}
