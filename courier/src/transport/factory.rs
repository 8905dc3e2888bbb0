use super::{AsyncTransport, GroupTransport, SyncTransport};
use crate::options::{BrokerOptions, ConsumerOptions};
use crate::BoxedError;
use async_trait::async_trait;

/// Factory to provide connected implementations of the transport traits
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// [`SyncTransport`] implementation type
    type SyncTransport: SyncTransport + 'static;
    /// [`AsyncTransport`] implementation type
    type AsyncTransport: AsyncTransport + 'static;
    /// [`GroupTransport`] implementation type
    type GroupTransport: GroupTransport + 'static;

    /// Connects a new [`SyncTransport`]
    async fn sync_transport(
        &self,
        broker: &BrokerOptions,
    ) -> Result<Self::SyncTransport, BoxedError>;

    /// Connects a new [`AsyncTransport`]
    async fn async_transport(
        &self,
        broker: &BrokerOptions,
    ) -> Result<Self::AsyncTransport, BoxedError>;

    /// Connects a new [`GroupTransport`] which is not yet part of the group
    async fn group_transport(
        &self,
        options: &ConsumerOptions,
    ) -> Result<Self::GroupTransport, BoxedError>;
}
