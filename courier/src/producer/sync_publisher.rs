use super::prepare;
use crate::diagnostics::{DiagnosticContext, DiagnosticEmitter};
use crate::options::ProducerOptions;
use crate::transport::{Placement, SyncTransport, TransportFactory};
use crate::{CourierError, Envelope};
use std::sync::Arc;
use tracing::instrument;

/// Publisher which waits for the broker to acknowledge every record
///
/// There is no retry logic at this layer, retrying is up to the transport.
pub struct SyncPublisher<T> {
    transport: T,
    hosts: Vec<String>,
    diagnostics: Arc<dyn DiagnosticEmitter>,
}

impl<T> SyncPublisher<T>
where
    T: SyncTransport,
{
    /// Connects a new transport obtained from the factory
    ///
    /// Failing to connect is unrecoverable. It is reported as a fatal diagnostic and
    /// returned as [`CourierError::Connection`].
    pub async fn connect<F>(
        factory: &F,
        options: &ProducerOptions,
        diagnostics: Arc<dyn DiagnosticEmitter>,
    ) -> Result<Self, CourierError>
    where
        F: TransportFactory<SyncTransport = T>,
    {
        let hosts = options.broker.hosts.clone();
        let context = DiagnosticContext::default().with_hosts(&hosts);

        match factory.sync_transport(&options.broker).await {
            Ok(transport) => {
                diagnostics.info("Sync publisher connected", &context);
                Ok(Self::new(transport, hosts, diagnostics))
            }
            Err(source) => {
                diagnostics.fatal("Sync publisher failed to connect", source.as_ref(), &context);
                Err(CourierError::Connection { hosts, source })
            }
        }
    }

    /// Wraps an already connected transport
    pub fn new(transport: T, hosts: Vec<String>, diagnostics: Arc<dyn DiagnosticEmitter>) -> Self {
        Self {
            transport,
            hosts,
            diagnostics,
        }
    }

    /// Sends an envelope and waits for the broker to acknowledge it
    #[instrument(level = "trace", skip(self, envelope), fields(id = envelope.id()))]
    pub async fn publish(
        &self,
        topic: &str,
        envelope: &Envelope,
        key: &str,
    ) -> Result<Placement, CourierError> {
        let record = prepare(self.diagnostics.as_ref(), topic, envelope, key)?;
        let context = record.context();

        match self.transport.send(record).await {
            Ok(placement) => {
                let context = context.with_position(placement.partition, placement.offset);
                self.diagnostics.debug("Record published", &context);
                Ok(placement)
            }
            Err(source) => {
                self.diagnostics
                    .error("Record could not be published", source.as_ref(), &context);
                Err(CourierError::Transport(source))
            }
        }
    }

    /// Releases the transport
    pub async fn close(self) -> Result<(), CourierError> {
        let context = DiagnosticContext::default().with_hosts(&self.hosts);

        match self.transport.close().await {
            Ok(()) => {
                self.diagnostics.info("Sync publisher closed", &context);
                Ok(())
            }
            Err(source) => {
                self.diagnostics
                    .error("Sync publisher failed to close", source.as_ref(), &context);
                Err(CourierError::Close(source))
            }
        }
    }
}
