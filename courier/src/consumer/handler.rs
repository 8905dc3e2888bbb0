use crate::{EmptyResult, Envelope};
use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// User logic invoked for every decoded message
///
/// The token passed along is cancelled when the generation ends, either because the group
/// rebalances or because consumption has been cancelled. Handlers are never interrupted, long
/// running work has to watch the token itself.
///
/// Implemented for every `Fn(CancellationToken, Envelope) -> impl Future<Output = EmptyResult>`.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Processes one envelope, an error leaves the decision about its offset to the commit policy
    async fn handle(&self, context: CancellationToken, envelope: Envelope) -> EmptyResult;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(CancellationToken, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EmptyResult> + Send,
{
    async fn handle(&self, context: CancellationToken, envelope: Envelope) -> EmptyResult {
        (self)(context, envelope).await
    }
}
