use super::{MemoryBroker, MemoryBrokerError};
use crate::transport::{
    AsyncTransport, Delivery, DeliveryFailure, DeliveryReports, Placement, Record, SyncTransport,
};
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// [`SyncTransport`] appending directly to a [`MemoryBroker`]
pub struct MemorySyncTransport {
    broker: MemoryBroker,
    closed: AtomicBool,
}

impl MemorySyncTransport {
    pub(super) fn new(broker: MemoryBroker) -> Self {
        Self {
            broker,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SyncTransport for MemorySyncTransport {
    async fn send(&self, record: Record) -> Result<Placement, BoxedError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MemoryBrokerError::Closed.into());
        }

        acknowledge(&self.broker).await;
        Ok(self.broker.append(&record)?)
    }

    async fn close(&self) -> EmptyResult {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(MemoryBrokerError::Closed.into());
        }

        Ok(())
    }
}

async fn acknowledge(broker: &MemoryBroker) {
    let latency = broker.ack_latency();

    if !latency.is_zero() {
        tokio::time::sleep(latency).await;
    }
}

enum Command {
    Send(Record),
    Close(oneshot::Sender<()>),
}

/// [`AsyncTransport`] backed by a background task which appends queued records to a [`MemoryBroker`]
pub struct MemoryAsyncTransport {
    input: mpsc::Sender<Command>,
    reports: Mutex<Option<DeliveryReports>>,
}

impl MemoryAsyncTransport {
    pub(super) fn spawn(broker: MemoryBroker) -> Self {
        let (input, queue) = mpsc::channel(broker.queue_capacity());
        let (successes, success_reports) = unbounded();
        let (failures, failure_reports) = unbounded();

        tokio::spawn(deliver(broker, queue, successes, failures));

        Self {
            input,
            reports: Mutex::new(Some(DeliveryReports {
                successes: success_reports.boxed(),
                failures: failure_reports.boxed(),
            })),
        }
    }
}

#[async_trait]
impl AsyncTransport for MemoryAsyncTransport {
    async fn enqueue(&self, record: Record) -> EmptyResult {
        self.input
            .send(Command::Send(record))
            .await
            .map_err(|_| MemoryBrokerError::Closed.into())
    }

    fn reports(&mut self) -> Option<DeliveryReports> {
        self.reports
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn close(&self) -> EmptyResult {
        let (done, flushed) = oneshot::channel();

        self.input
            .send(Command::Close(done))
            .await
            .map_err(|_| MemoryBrokerError::Closed)?;

        flushed.await.map_err(|_| MemoryBrokerError::Closed)?;

        Ok(())
    }
}

async fn deliver(
    broker: MemoryBroker,
    mut queue: mpsc::Receiver<Command>,
    successes: UnboundedSender<Delivery>,
    failures: UnboundedSender<DeliveryFailure>,
) {
    let mut flushed = Vec::new();

    while let Some(command) = queue.recv().await {
        match command {
            Command::Send(record) => {
                acknowledge(&broker).await;
                report(&broker, record, &successes, &failures);
            }
            Command::Close(done) => {
                flushed.push(done);
                queue.close();
            }
        }
    }

    debug!("Delivery queue drained");

    // Report streams end before anyone waiting for the flush is released
    drop(successes);
    drop(failures);

    for done in flushed {
        done.send(()).ok();
    }
}

fn report(
    broker: &MemoryBroker,
    record: Record,
    successes: &UnboundedSender<Delivery>,
    failures: &UnboundedSender<DeliveryFailure>,
) {
    match broker.append(&record) {
        Ok(placement) => {
            successes.unbounded_send(Delivery { record, placement }).ok();
        }
        Err(error) => {
            trace!(%error, "Record rejected");
            failures
                .unbounded_send(DeliveryFailure {
                    partition: Some(broker.route(&record)),
                    offset: None,
                    record,
                    error: Box::new(error),
                })
                .ok();
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn append_synchronously() {
        let transport = MemorySyncTransport::new(MemoryBroker::builder().partitions(1).build());

        let first = transport.send(Record::new("t", "k", vec![1])).await.unwrap();
        let second = transport.send(Record::new("t", "k", vec![2])).await.unwrap();

        assert_eq!(first.offset, 0);
        assert_eq!(second.offset, 1);
    }

    #[tokio::test]
    async fn refuse_sends_after_close() {
        let transport = MemorySyncTransport::new(MemoryBroker::default());

        transport.close().await.unwrap();

        assert!(transport.send(Record::new("t", "k", vec![])).await.is_err());
        assert!(transport.close().await.is_err());
    }

    #[tokio::test]
    async fn report_every_queued_record() {
        let broker = MemoryBroker::default();
        broker.reject_topic("rejected");

        let mut transport = MemoryAsyncTransport::spawn(broker.clone());
        let reports = transport.reports().unwrap();
        assert!(transport.reports().is_none());

        transport.enqueue(Record::new("accepted", "a", vec![])).await.unwrap();
        transport.enqueue(Record::new("rejected", "b", vec![])).await.unwrap();
        transport.enqueue(Record::new("accepted", "c", vec![])).await.unwrap();
        transport.close().await.unwrap();

        let successes: Vec<Delivery> = reports.successes.collect().await;
        let failures: Vec<DeliveryFailure> = reports.failures.collect().await;

        assert_eq!(successes.len(), 2);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].record.key, "b");
        assert_eq!(failures[0].partition, Some(broker.route(&failures[0].record)));
        assert_eq!(failures[0].offset, None);
    }

    #[tokio::test]
    async fn refuse_records_after_close() {
        let transport = MemoryAsyncTransport::spawn(MemoryBroker::default());

        transport.close().await.unwrap();

        assert!(transport.enqueue(Record::new("t", "k", vec![])).await.is_err());
        assert!(transport.close().await.is_err());
    }
}
