use super::prepare;
use crate::diagnostics::{DiagnosticContext, DiagnosticEmitter};
use crate::options::ProducerOptions;
use crate::transport::{AsyncTransport, Delivery, DeliveryFailure, TransportFactory};
use crate::{CourierError, Envelope};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

/// Number of outcomes observed by the delivery report drains of an [`AsyncPublisher`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliverySummary {
    /// Records acknowledged by the broker
    pub delivered: u64,
    /// Records the transport failed to deliver
    pub failed: u64,
}

impl DeliverySummary {
    /// Total number of outcomes
    pub fn total(&self) -> u64 {
        self.delivered + self.failed
    }
}

/// Publisher which hands records to the transport queue without waiting for the broker
///
/// Acknowledgments are consumed by two background tasks which run from [`connect`](Self::connect)
/// until [`close`](Self::close). Successful deliveries are reported as debug diagnostics, failed
/// ones as error diagnostics. There is no per-record error path for the caller apart from
/// local failures like serialization or a closed queue.
pub struct AsyncPublisher<T> {
    transport: T,
    hosts: Vec<String>,
    close_grace: Duration,
    diagnostics: Arc<dyn DiagnosticEmitter>,
    successes: JoinHandle<u64>,
    failures: JoinHandle<u64>,
}

impl<T> AsyncPublisher<T>
where
    T: AsyncTransport,
{
    /// Connects a new transport obtained from the factory and starts the report drains
    ///
    /// Failing to connect is unrecoverable. It is reported as a fatal diagnostic and
    /// returned as [`CourierError::Connection`].
    pub async fn connect<F>(
        factory: &F,
        options: &ProducerOptions,
        diagnostics: Arc<dyn DiagnosticEmitter>,
    ) -> Result<Self, CourierError>
    where
        F: TransportFactory<AsyncTransport = T>,
    {
        let hosts = options.broker.hosts.clone();
        let context = DiagnosticContext::default().with_hosts(&hosts);

        match factory.async_transport(&options.broker).await {
            Ok(transport) => {
                diagnostics.info("Async publisher connected", &context);
                Self::new(transport, options, diagnostics)
            }
            Err(source) => {
                diagnostics.fatal("Async publisher failed to connect", source.as_ref(), &context);
                Err(CourierError::Connection { hosts, source })
            }
        }
    }

    /// Wraps an already connected transport and starts the report drains
    ///
    /// Outcomes could not be observed without the transport's report streams, a transport
    /// which already handed them out is refused with [`CourierError::ReportsTaken`].
    /// Has to be called from within a tokio runtime.
    pub fn new(
        mut transport: T,
        options: &ProducerOptions,
        diagnostics: Arc<dyn DiagnosticEmitter>,
    ) -> Result<Self, CourierError> {
        let context = DiagnosticContext::default().with_hosts(&options.broker.hosts);

        let reports = match transport.reports() {
            Some(reports) => reports,
            None => {
                let error = CourierError::ReportsTaken;
                diagnostics.error("Async publisher can not observe deliveries", &error, &context);
                return Err(error);
            }
        };

        Ok(Self {
            transport,
            hosts: options.broker.hosts.clone(),
            close_grace: options.close_grace,
            successes: tokio::spawn(drain_successes(reports.successes, diagnostics.clone())),
            failures: tokio::spawn(drain_failures(reports.failures, diagnostics.clone())),
            diagnostics,
        })
    }

    /// Places an envelope in the transport queue
    ///
    /// Only waits as long as the transport takes to accept the record. Errors returned
    /// are local, the outcome of the actual delivery is reported by the drains.
    #[instrument(level = "trace", skip(self, envelope), fields(id = envelope.id()))]
    pub async fn publish(&self, topic: &str, envelope: &Envelope, key: &str) -> Result<(), CourierError> {
        let record = prepare(self.diagnostics.as_ref(), topic, envelope, key)?;
        let context = record.context();

        match self.transport.enqueue(record).await {
            Ok(()) => {
                self.diagnostics.debug("Record enqueued", &context);
                Ok(())
            }
            Err(source) => {
                self.diagnostics
                    .error("Record could not be enqueued", source.as_ref(), &context);
                Err(CourierError::Transport(source))
            }
        }
    }

    /// Flushes the queue, closes the transport and waits for both drains to finish
    ///
    /// The grace period from the [`ProducerOptions`] is awaited first so in-flight records
    /// can be acknowledged. The report streams end once the transport is closed, which
    /// terminates the drains even if closing failed.
    pub async fn close(self) -> Result<DeliverySummary, CourierError> {
        let context = DiagnosticContext::default().with_hosts(&self.hosts);
        self.diagnostics.info("Async publisher closing", &context);

        if !self.close_grace.is_zero() {
            tokio::time::sleep(self.close_grace).await;
        }

        let closed = self.transport.close().await;

        let summary = DeliverySummary {
            delivered: join_drain(self.successes, self.diagnostics.as_ref(), &context).await,
            failed: join_drain(self.failures, self.diagnostics.as_ref(), &context).await,
        };

        debug!(delivered = summary.delivered, failed = summary.failed, "Report drains finished");

        match closed {
            Ok(()) => {
                self.diagnostics.info("Async publisher closed", &context);
                Ok(summary)
            }
            Err(source) => {
                self.diagnostics
                    .error("Async publisher failed to close", source.as_ref(), &context);
                Err(CourierError::Close(source))
            }
        }
    }
}

async fn drain_successes(
    mut successes: BoxStream<'static, Delivery>,
    diagnostics: Arc<dyn DiagnosticEmitter>,
) -> u64 {
    let mut delivered = 0;

    while let Some(delivery) = successes.next().await {
        delivered += 1;
        diagnostics.debug("Record delivered", &delivery.context());
    }

    delivered
}

async fn drain_failures(
    mut failures: BoxStream<'static, DeliveryFailure>,
    diagnostics: Arc<dyn DiagnosticEmitter>,
) -> u64 {
    let mut failed = 0;

    while let Some(failure) = failures.next().await {
        failed += 1;
        diagnostics.error("Record delivery failed", failure.error.as_ref(), &failure.context());
    }

    failed
}

async fn join_drain(
    drain: JoinHandle<u64>,
    diagnostics: &dyn DiagnosticEmitter,
    context: &DiagnosticContext,
) -> u64 {
    match drain.await {
        Ok(count) => count,
        Err(error) => {
            diagnostics.error("Delivery report drain aborted", &error, context);
            0
        }
    }
}
