use super::dispatcher::ClaimDispatcher;
use super::MessageHandler;
use crate::diagnostics::{DiagnosticContext, DiagnosticEmitter};
use crate::options::ConsumerOptions;
use crate::transport::{Generation, GroupTransport, TransportFactory};
use crate::{BoxedError, CourierError};
use futures::future::join_all;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Member of a consumer group which dispatches received envelopes to a [`MessageHandler`]
///
/// Errors reported by the transport in the background are drained into error diagnostics
/// from [`connect`](Self::connect) until the group is closed.
pub struct ConsumerGroup<T> {
    transport: T,
    options: ConsumerOptions,
    diagnostics: Arc<dyn DiagnosticEmitter>,
    errors: JoinHandle<u64>,
}

impl<T> ConsumerGroup<T>
where
    T: GroupTransport,
{
    /// Connects a new transport obtained from the factory
    ///
    /// Failing to connect is unrecoverable. It is reported as a fatal diagnostic and
    /// returned as [`CourierError::Connection`].
    pub async fn connect<F>(
        factory: &F,
        options: &ConsumerOptions,
        diagnostics: Arc<dyn DiagnosticEmitter>,
    ) -> Result<Self, CourierError>
    where
        F: TransportFactory<GroupTransport = T>,
    {
        let hosts = options.broker.hosts.clone();
        let context = DiagnosticContext::default()
            .with_hosts(&hosts)
            .with_group(options.group_id.as_str());

        match factory.group_transport(options).await {
            Ok(transport) => {
                diagnostics.info("Consumer group connected", &context);
                Self::new(transport, options.clone(), diagnostics)
            }
            Err(source) => {
                diagnostics.fatal("Consumer group failed to connect", source.as_ref(), &context);
                Err(CourierError::Connection { hosts, source })
            }
        }
    }

    /// Wraps an already connected transport and starts draining its background errors
    ///
    /// A transport whose error stream has already been taken is refused with
    /// [`CourierError::ReportsTaken`]. Has to be called from within a tokio runtime.
    pub fn new(
        mut transport: T,
        options: ConsumerOptions,
        diagnostics: Arc<dyn DiagnosticEmitter>,
    ) -> Result<Self, CourierError> {
        let context = DiagnosticContext::default()
            .with_hosts(&options.broker.hosts)
            .with_group(options.group_id.as_str());

        let errors = match transport.errors() {
            Some(errors) => errors,
            None => {
                let error = CourierError::ReportsTaken;
                diagnostics.error("Consumer group can not observe transport errors", &error, &context);
                return Err(error);
            }
        };

        Ok(Self {
            transport,
            errors: tokio::spawn(drain_errors(errors, diagnostics.clone(), context)),
            options,
            diagnostics,
        })
    }

    fn context(&self, topics: &[String]) -> DiagnosticContext {
        DiagnosticContext::default()
            .with_hosts(&self.options.broker.hosts)
            .with_group(self.options.group_id.as_str())
            .with_topics(topics)
    }

    /// Joins the group and processes claims until the token is cancelled
    ///
    /// Every generation runs to completion before the group is joined again. Failed joins
    /// are reported and retried after a backoff which can be interrupted by cancelling.
    /// Cancellation is only checked between generations, a running handler is never aborted.
    ///
    /// Once stopped the transport is closed and its result returned.
    pub async fn consume<H>(
        self,
        cancellation: CancellationToken,
        topics: &[String],
        handler: H,
        commit_after_failure: bool,
    ) -> Result<(), CourierError>
    where
        H: MessageHandler,
    {
        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        let context = self.context(topics);
        let mut backoff = self.options.retry.backoff();

        while !cancellation.is_cancelled() {
            match self.transport.join(topics, cancellation.clone()).await {
                Ok(generation) => {
                    backoff.reset();
                    self.run_generation(generation, &handler, commit_after_failure, &context)
                        .await;
                }
                Err(error) => {
                    self.diagnostics
                        .error("Consumer group session failed", error.as_ref(), &context);

                    let delay = backoff.next().unwrap_or(self.options.retry.retry_max);
                    debug!(?delay, "Retrying to join");

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {},
                        _ = cancellation.cancelled() => {},
                    }
                }
            }
        }

        debug!("Consumption cancelled");
        self.close().await
    }

    async fn run_generation(
        &self,
        generation: Generation,
        handler: &Arc<dyn MessageHandler>,
        commit_after_failure: bool,
        context: &DiagnosticContext,
    ) {
        let Generation { session, claims } = generation;

        debug!(
            generation = session.generation(),
            member = session.member_id(),
            claims = claims.len(),
            "Generation started"
        );
        self.diagnostics.info("Consumer group session started", context);

        let dispatchers = claims.into_iter().map(|claim| {
            let dispatcher = ClaimDispatcher {
                session: session.clone(),
                handler: handler.clone(),
                diagnostics: self.diagnostics.clone(),
                group_id: self.options.group_id.clone(),
                commit_after_failure,
            };

            tokio::spawn(dispatcher.run(claim))
        });

        for finished in join_all(dispatchers).await {
            if let Err(error) = finished {
                self.diagnostics
                    .error("Claim dispatcher aborted", &error, context);
            }
        }

        // Generation is over once its token fires, even without any claims
        session.context().cancelled().await;

        if let Err(error) = session.end().await {
            self.diagnostics
                .error("Consumer group session cleanup failed", error.as_ref(), context);
        }
    }

    /// Leaves the group and releases the transport
    ///
    /// Waits for the background error drain to observe the end of the error stream.
    pub async fn close(self) -> Result<(), CourierError> {
        let context = DiagnosticContext::default()
            .with_hosts(&self.options.broker.hosts)
            .with_group(self.options.group_id.as_str());

        let closed = self.transport.close().await;

        match self.errors.await {
            Ok(count) => debug!(errors = count, "Error drain finished"),
            Err(error) => self
                .diagnostics
                .error("Consumer error drain aborted", &error, &context),
        }

        match closed {
            Ok(()) => {
                self.diagnostics.info("Consumer group closed", &context);
                Ok(())
            }
            Err(source) => {
                self.diagnostics
                    .error("Consumer group failed to close", source.as_ref(), &context);
                Err(CourierError::Close(source))
            }
        }
    }
}

async fn drain_errors(
    mut errors: BoxStream<'static, BoxedError>,
    diagnostics: Arc<dyn DiagnosticEmitter>,
    context: DiagnosticContext,
) -> u64 {
    let mut count = 0;

    while let Some(error) = errors.next().await {
        count += 1;
        diagnostics.error("Consumer group transport error", error.as_ref(), &context);
    }

    count
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::diagnostics::{RecordingEmitter, Severity};
    use crate::implementation::memory::MemoryBroker;
    use crate::options::{BrokerOptions, RetryOptions, StartOffset};
    use crate::producer::SyncPublisher;
    use crate::{EmptyResult, Envelope};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn options() -> ConsumerOptions {
        ConsumerOptions::new(BrokerOptions::new(vec!["memory:9092"]), "group").with_retry(RetryOptions {
            retry_initial: Duration::from_millis(1),
            retry_max: Duration::from_millis(5),
            retry_multiplier: 2,
        })
    }

    fn topics() -> Vec<String> {
        vec!["sessions".to_owned()]
    }

    async fn publish(broker: &MemoryBroker, data: &[&str]) {
        let options = crate::options::ProducerOptions::new(BrokerOptions::new(vec!["memory:9092"]));
        let publisher = SyncPublisher::connect(broker, &options, Arc::new(RecordingEmitter::default()))
            .await
            .unwrap();

        for entry in data {
            publisher
                .publish("sessions", &Envelope::new("created", *entry), "key")
                .await
                .unwrap();
        }

        publisher.close().await.unwrap();
    }

    /// Handler forwarding the data of every envelope and failing on request
    fn forward(
        sink: mpsc::UnboundedSender<String>,
    ) -> impl Fn(CancellationToken, Envelope) -> futures::future::Ready<EmptyResult> + Send + Sync + 'static {
        move |_, envelope| {
            let result = if envelope.data() == "fail" {
                Err(BoxedError::from("refused"))
            } else {
                Ok(())
            };

            sink.send(envelope.data().to_owned()).ok();
            futures::future::ready(result)
        }
    }

    #[tokio::test]
    async fn dispatch_until_cancelled() {
        let broker = MemoryBroker::builder().partitions(1).build();
        publish(&broker, &["a", "b", "c"]).await;

        let recorder = RecordingEmitter::default();
        let group = ConsumerGroup::connect(&broker, &options(), Arc::new(recorder.clone()))
            .await
            .unwrap();

        let (sink, mut received) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let consumer = tokio::spawn({
            let token = token.clone();
            async move { group.consume(token, &topics(), forward(sink), false).await }
        });

        for expected in ["a", "b", "c"] {
            assert_eq!(received.recv().await.unwrap(), expected);
        }

        token.cancel();
        timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(broker.committed_offset("group", "sessions", 0), Some(3));
        assert_eq!(recorder.count(Severity::Info, "Consumer group session started"), 1);
        assert_eq!(recorder.count(Severity::Info, "Consumer group closed"), 1);
        assert_eq!(recorder.count(Severity::Error, "Consumer group failed to close"), 0);
        assert!(broker.members("group").is_empty());
    }

    #[tokio::test]
    async fn retry_failed_joins() {
        let broker = MemoryBroker::builder().partitions(1).build();
        broker.fail_next_joins(3);
        publish(&broker, &["a"]).await;

        let recorder = RecordingEmitter::default();
        let group = ConsumerGroup::connect(&broker, &options(), Arc::new(recorder.clone()))
            .await
            .unwrap();

        let (sink, mut received) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let consumer = tokio::spawn({
            let token = token.clone();
            async move { group.consume(token, &topics(), forward(sink), false).await }
        });

        assert_eq!(received.recv().await.unwrap(), "a");
        token.cancel();
        consumer.await.unwrap().unwrap();

        assert_eq!(recorder.count(Severity::Error, "Consumer group session failed"), 3);
    }

    #[tokio::test]
    async fn stop_retrying_when_cancelled() {
        let broker = MemoryBroker::default();
        broker.fail_next_joins(usize::MAX);

        let options = options().with_retry(RetryOptions {
            retry_initial: Duration::from_secs(3600),
            retry_max: Duration::from_secs(3600),
            retry_multiplier: 1,
        });
        let group = ConsumerGroup::connect(&broker, &options, Arc::new(RecordingEmitter::default()))
            .await
            .unwrap();

        let token = CancellationToken::new();
        let consumer = tokio::spawn({
            let token = token.clone();
            async move { group.consume(token, &topics(), forward(mpsc::unbounded_channel().0), false).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = timeout(Duration::from_secs(1), consumer).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[tokio::test]
    async fn redeliver_failed_messages_after_restart() {
        let broker = MemoryBroker::builder().partitions(1).build();
        publish(&broker, &["fail"]).await;

        for _ in 0..2 {
            let group = ConsumerGroup::connect(&broker, &options(), Arc::new(RecordingEmitter::default()))
                .await
                .unwrap();

            let (sink, mut received) = mpsc::unbounded_channel();
            let token = CancellationToken::new();
            let consumer = tokio::spawn({
                let token = token.clone();
                async move { group.consume(token, &topics(), forward(sink), false).await }
            });

            assert_eq!(received.recv().await.unwrap(), "fail");
            token.cancel();
            consumer.await.unwrap().unwrap();

            assert_eq!(broker.committed_offset("group", "sessions", 0), None);
        }
    }

    #[tokio::test]
    async fn report_transport_errors() {
        let broker = MemoryBroker::builder().partitions(1).build();
        let recorder = RecordingEmitter::default();
        let options = options().with_start_from(StartOffset::Offset(5));
        let group = ConsumerGroup::connect(&broker, &options, Arc::new(recorder.clone()))
            .await
            .unwrap();

        let token = CancellationToken::new();
        let consumer = tokio::spawn({
            let token = token.clone();
            async move { group.consume(token, &topics(), forward(mpsc::unbounded_channel().0), false).await }
        });

        timeout(Duration::from_secs(1), async {
            while recorder.count(Severity::Info, "Consumer group session started") == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        consumer.await.unwrap().unwrap();

        let errors = recorder.matching(Severity::Error, "Consumer group transport error");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].error.as_deref().unwrap().contains("out of range"));
        assert_eq!(errors[0].context.group_id(), Some("group"));
    }

    #[tokio::test]
    async fn report_unreachable_brokers_as_fatal() {
        let recorder = RecordingEmitter::default();
        let options = ConsumerOptions::new(BrokerOptions::new(vec!["nowhere:9092"]), "group");

        let result = ConsumerGroup::connect(&MemoryBroker::default(), &options, Arc::new(recorder.clone())).await;

        assert!(matches!(result, Err(CourierError::Connection { .. })));
        assert_eq!(recorder.count(Severity::Fatal, "Consumer group failed to connect"), 1);
    }

    #[tokio::test]
    async fn refuse_transports_without_error_streams() {
        let broker = MemoryBroker::default();
        let recorder = RecordingEmitter::default();
        let mut transport = broker.group_transport(&options()).await.unwrap();
        let _errors = transport.errors();

        let result = ConsumerGroup::new(transport, options(), Arc::new(recorder.clone()));

        assert!(matches!(result, Err(CourierError::ReportsTaken)));
        assert_eq!(
            recorder.count(Severity::Error, "Consumer group can not observe transport errors"),
            1
        );
    }
}
