use super::ConsumerMessage;
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Membership of one consumer within one generation of a consumer group
#[async_trait]
pub trait GroupSession: Send + Sync {
    /// Generation number assigned by the group
    fn generation(&self) -> u64;

    /// Identifier of this consumer within the group
    fn member_id(&self) -> &str;

    /// Token which is cancelled when the generation ends
    fn context(&self) -> CancellationToken;

    /// Stages the message as processed
    ///
    /// The next committed position for the message's partition becomes `offset + 1`
    /// unless a later position has already been staged. Staging does not commit, committing
    /// is up to the transport.
    fn mark_message(&self, message: &ConsumerMessage);

    /// Cleanup after all claims of the generation have been processed
    async fn end(&self) -> EmptyResult;
}

/// Ordered backlog of one topic-partition assigned to this consumer for one generation
pub struct Claim {
    /// Topic of the claimed partition
    pub topic: String,
    /// Claimed partition
    pub partition: i32,
    /// Offset of the first message the claim will yield
    pub initial_offset: i64,
    /// Messages in partition order, ends when the claim is revoked
    pub messages: BoxStream<'static, ConsumerMessage>,
}

/// Result of joining a consumer group
pub struct Generation {
    /// Membership for the duration of this generation
    pub session: Arc<dyn GroupSession>,
    /// Partitions assigned to this consumer
    pub claims: Vec<Claim>,
}

/// Transport which participates in a consumer group
#[async_trait]
pub trait GroupTransport: Send + Sync {
    /// Joins or re-joins the group for the given topics
    ///
    /// The claims of the returned generation end when the group rebalances or
    /// the cancellation token fires.
    async fn join(
        &self,
        topics: &[String],
        cancellation: CancellationToken,
    ) -> Result<Generation, BoxedError>;

    /// Hands out the stream of background errors, returns `None` if it has already been taken
    ///
    /// The stream ends when the transport is closed.
    fn errors(&mut self) -> Option<BoxStream<'static, BoxedError>>;

    /// Leaves the group, commits staged offsets and releases the connection
    async fn close(&self) -> EmptyResult;
}
