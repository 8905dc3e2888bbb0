use crate::options::SimulateOptions;
use anyhow::Result;
use courier::consumer::ConsumerGroup;
use courier::diagnostics::{DiagnosticEmitter, TracingEmitter};
use courier::implementation::memory::MemoryBroker;
use courier::options::ProducerOptions;
use courier::producer::{AsyncPublisher, SyncPublisher};
use courier::{BoxedError, EmptyResult, Envelope};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SENDER: &str = "courier-cli";

/// Publishes a backlog, consumes it with a group and prints the committed offsets
pub async fn run(options: SimulateOptions) -> Result<()> {
    let broker = MemoryBroker::builder()
        .hosts(vec![options.advertised_host.clone()])
        .partitions(options.partitions)
        .ack_latency(options.ack_latency)
        .build();
    broker.create_topic(&options.topic, options.partitions);

    let diagnostics: Arc<dyn DiagnosticEmitter> = Arc::new(TracingEmitter);
    let producer_options =
        ProducerOptions::new(options.consumer.broker.clone()).with_close_grace(options.close_grace);

    publish_backlog(&broker, &options, &producer_options, diagnostics.clone()).await?;

    let token = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(token.clone()));

    let group = ConsumerGroup::connect(&broker, &options.consumer, diagnostics).await?;
    let handler = simulated_handler(options.messages + 1, options.fail_every, token.clone());
    let topics = vec![options.topic.clone()];

    group
        .consume(token, &topics, handler, options.consumer.commit_after_failure)
        .await?;

    for partition in 0..broker.partition_count(&options.topic) as i32 {
        let end = broker.end_offset(&options.topic, partition);
        let committed = broker
            .committed_offset(&options.consumer.group_id, &options.topic, partition)
            .map_or_else(|| "-".to_owned(), |offset| offset.to_string());

        println!("{}/{}\tcommitted {}\tend {}", options.topic, partition, committed, end);
    }

    Ok(())
}

async fn publish_backlog(
    broker: &MemoryBroker,
    options: &SimulateOptions,
    producer_options: &ProducerOptions,
    diagnostics: Arc<dyn DiagnosticEmitter>,
) -> Result<()> {
    let publisher = AsyncPublisher::connect(broker, producer_options, diagnostics.clone()).await?;

    for index in 0..options.messages {
        let envelope = Envelope::new("simulation.message", index.to_string()).with_sender(SENDER);
        publisher
            .publish(&options.topic, &envelope, &format!("key-{}", index))
            .await?;
    }

    let summary = publisher.close().await?;
    info!(delivered = summary.delivered, failed = summary.failed, "Backlog published");

    let publisher = SyncPublisher::connect(broker, producer_options, diagnostics).await?;
    let marker = Envelope::new("simulation.marker", "end").with_sender(SENDER);
    let placement = publisher.publish(&options.topic, &marker, "marker").await?;
    publisher.close().await?;

    info!(
        partition = placement.partition,
        offset = placement.offset,
        "Marker published"
    );

    Ok(())
}

async fn cancel_on_interrupt(token: CancellationToken) {
    tokio::select! {
        interrupt = signal::ctrl_c() => {
            if let Err(error) = interrupt {
                warn!(%error, "Unable to listen for interrupts");
                return;
            }

            info!("Interrupted, stopping consumer");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

/// Handler which fails every n-th message and stops consumption once `expected` messages were seen
fn simulated_handler(
    expected: usize,
    fail_every: Option<usize>,
    done: CancellationToken,
) -> impl Fn(CancellationToken, Envelope) -> std::future::Ready<EmptyResult> + Send + Sync + 'static {
    let attempts = AtomicUsize::new(0);

    move |_, envelope| {
        if attempts.fetch_add(1, Ordering::SeqCst) + 1 >= expected {
            done.cancel();
        }

        std::future::ready(process(&envelope, fail_every))
    }
}

fn process(envelope: &Envelope, fail_every: Option<usize>) -> EmptyResult {
    let index = match envelope.data().parse::<usize>() {
        Ok(index) => index,
        Err(_) => return Ok(()),
    };

    match fail_every {
        Some(every) if every > 0 && (index + 1) % every == 0 => Err(BoxedError::from(format!(
            "simulated failure for message {}",
            index
        ))),
        _ => Ok(()),
    }
}
