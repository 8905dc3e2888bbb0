use super::{Delivery, DeliveryFailure, Placement, Record};
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Transport which sends records one at a time and waits for the acknowledgment
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Sends a record and waits until the broker acknowledged or rejected it
    async fn send(&self, record: Record) -> Result<Placement, BoxedError>;

    /// Flushes pending work and releases the connection
    async fn close(&self) -> EmptyResult;
}

/// Outcome streams of an [`AsyncTransport`]
///
/// Both streams are ordered the way the transport acknowledges records which is
/// not necessarily the order in which they have been enqueued. They end once the
/// transport has been closed and all queued records have been reported.
pub struct DeliveryReports {
    /// Records acknowledged by the broker
    pub successes: BoxStream<'static, Delivery>,
    /// Records that could not be delivered
    pub failures: BoxStream<'static, DeliveryFailure>,
}

/// Transport which queues records and reports their outcome asynchronously
#[async_trait]
pub trait AsyncTransport: Send + Sync {
    /// Places a record in the send queue
    ///
    /// Returns once the record has been accepted. Implementations may only wait
    /// for their own queue capacity, never for the broker's acknowledgment.
    async fn enqueue(&self, record: Record) -> EmptyResult;

    /// Hands out the outcome streams, returns `None` if they have already been taken
    fn reports(&mut self) -> Option<DeliveryReports>;

    /// Sends every queued record, reports its outcome and ends both report streams
    ///
    /// The report streams have to end even if closing fails.
    async fn close(&self) -> EmptyResult;
}
