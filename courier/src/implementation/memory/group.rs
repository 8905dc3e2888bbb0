use super::broker::StagedOffsets;
use super::{MemoryBroker, MemoryBrokerError};
use crate::helpers::lock;
use crate::options::StartOffset;
use crate::transport::{Claim, ConsumerMessage, Generation, GroupSession, GroupTransport};
use crate::{BoxedError, EmptyResult};
use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// [`GroupTransport`] which joins consumer groups of a [`MemoryBroker`]
///
/// Staged offsets are committed when a session ends and when the transport is closed.
pub struct MemoryGroupTransport {
    broker: MemoryBroker,
    group_id: String,
    member_id: String,
    start_from: StartOffset,
    errors: Mutex<Option<UnboundedReceiver<BoxedError>>>,
    error_sink: Mutex<Option<UnboundedSender<BoxedError>>>,
    active: Mutex<Option<Arc<MemorySession>>>,
    closed: AtomicBool,
}

impl MemoryGroupTransport {
    pub(super) fn new(broker: MemoryBroker, group_id: String, start_from: StartOffset) -> Self {
        let (sink, errors) = unbounded();
        let member_id = broker.next_member_id(&group_id);

        Self {
            broker,
            group_id,
            member_id,
            start_from,
            errors: Mutex::new(Some(errors)),
            error_sink: Mutex::new(Some(sink)),
            active: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Identifier under which this transport joins its group
    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    fn report(&self, error: MemoryBrokerError) {
        if let Some(sink) = lock(&self.error_sink).as_ref() {
            sink.unbounded_send(Box::new(error)).ok();
        }
    }

    fn initial_offset(&self, topic: &str, partition: i32) -> i64 {
        if let Some(committed) = self.broker.committed_offset(&self.group_id, topic, partition) {
            return committed;
        }

        let end = self.broker.end_offset(topic, partition);

        match self.start_from {
            StartOffset::Earliest => 0,
            StartOffset::Latest => end,
            StartOffset::Offset(offset) if offset > end => {
                self.report(MemoryBrokerError::OffsetOutOfRange {
                    topic: topic.to_owned(),
                    partition,
                    offset,
                    reset_to: end,
                });
                end
            }
            StartOffset::Offset(offset) => offset,
        }
    }
}

#[async_trait]
impl GroupTransport for MemoryGroupTransport {
    async fn join(
        &self,
        topics: &[String],
        cancellation: CancellationToken,
    ) -> Result<Generation, BoxedError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MemoryBrokerError::Closed.into());
        }

        if self.broker.take_join_failure() {
            return Err(MemoryBrokerError::CoordinatorUnavailable.into());
        }

        let staged = StagedOffsets::default();
        let membership =
            self.broker
                .join_group(&self.group_id, &self.member_id, topics, staged.clone());
        let token = cancellation.child_token();

        tokio::spawn(watch_generation(
            membership.changes.clone(),
            membership.generation,
            token.clone(),
        ));

        let claims = membership
            .assignment
            .into_iter()
            .map(|(topic, partition)| {
                let initial_offset = self.initial_offset(&topic, partition);
                let cursor = Cursor {
                    broker: self.broker.clone(),
                    topic: topic.clone(),
                    partition,
                    next: initial_offset,
                    appended: self.broker.subscribe_appends(),
                    changes: membership.changes.clone(),
                    generation: membership.generation,
                    token: token.clone(),
                };

                Claim {
                    topic,
                    partition,
                    initial_offset,
                    messages: cursor.into_stream(),
                }
            })
            .collect::<Vec<_>>();

        debug!(
            group = %self.group_id,
            member = %self.member_id,
            generation = membership.generation,
            claims = claims.len(),
            "Joined group"
        );

        let session = Arc::new(MemorySession {
            broker: self.broker.clone(),
            group_id: self.group_id.clone(),
            member_id: self.member_id.clone(),
            generation: membership.generation,
            token,
            staged,
        });

        *lock(&self.active) = Some(session.clone());

        Ok(Generation { session, claims })
    }

    fn errors(&mut self) -> Option<BoxStream<'static, BoxedError>> {
        self.errors
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|errors| errors.boxed())
    }

    async fn close(&self) -> EmptyResult {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(MemoryBrokerError::Closed.into());
        }

        if let Some(session) = lock(&self.active).take() {
            session.commit();
            session.token.cancel();
        }

        self.broker.leave_group(&self.group_id, &self.member_id);
        lock(&self.error_sink).take();

        Ok(())
    }
}

/// Cancels the session token once the group moves on to another generation
async fn watch_generation(
    mut changes: watch::Receiver<u64>,
    generation: u64,
    token: CancellationToken,
) {
    loop {
        if *changes.borrow_and_update() != generation {
            token.cancel();
            return;
        }

        tokio::select! {
            changed = changes.changed() => if changed.is_err() { return },
            _ = token.cancelled() => return,
        }
    }
}

/// Membership of a [`MemoryGroupTransport`] in one generation
pub struct MemorySession {
    broker: MemoryBroker,
    group_id: String,
    member_id: String,
    generation: u64,
    token: CancellationToken,
    staged: StagedOffsets,
}

impl MemorySession {
    fn commit(&self) {
        let staged = std::mem::take(&mut *lock(&*self.staged));

        if !self.broker.commit(&self.group_id, self.generation, staged) {
            debug!(
                group = %self.group_id,
                member = %self.member_id,
                generation = self.generation,
                "Dropped offsets staged after the generation ended"
            );
        }
    }
}

#[async_trait]
impl GroupSession for MemorySession {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn member_id(&self) -> &str {
        &self.member_id
    }

    fn context(&self) -> CancellationToken {
        self.token.clone()
    }

    fn mark_message(&self, message: &ConsumerMessage) {
        let next = message.offset + 1;

        lock(&*self.staged)
            .entry((message.topic.clone(), message.partition))
            .and_modify(|staged| *staged = (*staged).max(next))
            .or_insert(next);
    }

    async fn end(&self) -> EmptyResult {
        self.token.cancel();
        self.commit();
        Ok(())
    }
}

struct Cursor {
    broker: MemoryBroker,
    topic: String,
    partition: i32,
    next: i64,
    appended: watch::Receiver<u64>,
    changes: watch::Receiver<u64>,
    generation: u64,
    token: CancellationToken,
}

impl Cursor {
    fn revoked(&self) -> bool {
        self.token.is_cancelled() || *self.changes.borrow() != self.generation
    }

    /// Yields messages in partition order until the claim is revoked
    fn into_stream(self) -> BoxStream<'static, ConsumerMessage> {
        stream::unfold(self, |mut cursor| async move {
            loop {
                cursor.appended.borrow_and_update();

                if cursor.revoked() {
                    cursor.token.cancel();
                    return None;
                }

                if let Some(message) = cursor.broker.read(&cursor.topic, cursor.partition, cursor.next) {
                    cursor.next += 1;
                    return Some((message, cursor));
                }

                tokio::select! {
                    changed = cursor.appended.changed() => if changed.is_err() {
                        warn!(topic = %cursor.topic, partition = cursor.partition, "Broker went away");
                        return None;
                    },
                    changed = cursor.changes.changed() => if changed.is_err() { return None },
                    _ = cursor.token.cancelled() => {},
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::implementation::memory::MemorySyncTransport;
    use crate::transport::{Record, SyncTransport};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::timeout;

    fn topics() -> Vec<String> {
        vec!["sessions".to_owned()]
    }

    async fn publish(broker: &MemoryBroker, count: usize) {
        let transport = MemorySyncTransport::new(broker.clone());

        for index in 0..count {
            transport
                .send(Record::new("sessions", "key", index.to_string().into_bytes()))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn deliver_messages_in_order() {
        let broker = MemoryBroker::builder().partitions(1).build();
        publish(&broker, 3).await;

        let transport = MemoryGroupTransport::new(broker, "group".into(), StartOffset::Earliest);
        let mut generation = transport.join(&topics(), CancellationToken::new()).await.unwrap();
        let claim = generation.claims.remove(0);

        let offsets: Vec<i64> = claim.messages.take(3).map(|message| message.offset).collect().await;

        assert_eq!(offsets, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn commit_marked_offsets_when_the_session_ends() {
        let broker = MemoryBroker::builder().partitions(1).build();
        publish(&broker, 2).await;

        let transport = MemoryGroupTransport::new(broker.clone(), "group".into(), StartOffset::Earliest);
        let mut generation = transport.join(&topics(), CancellationToken::new()).await.unwrap();
        let mut messages = generation.claims.remove(0).messages;

        messages.next().await.unwrap();
        let second = messages.next().await.unwrap();
        generation.session.mark_message(&second);
        assert_eq!(broker.committed_offset("group", "sessions", 0), None);

        generation.session.end().await.unwrap();

        assert_eq!(broker.committed_offset("group", "sessions", 0), Some(2));
        assert!(generation.session.context().is_cancelled());
    }

    #[tokio::test]
    async fn never_move_staged_offsets_backwards() {
        let broker = MemoryBroker::builder().partitions(1).build();
        publish(&broker, 2).await;

        let transport = MemoryGroupTransport::new(broker.clone(), "group".into(), StartOffset::Earliest);
        let mut generation = transport.join(&topics(), CancellationToken::new()).await.unwrap();
        let mut messages = generation.claims.remove(0).messages;

        let first = messages.next().await.unwrap();
        let second = messages.next().await.unwrap();
        generation.session.mark_message(&second);
        generation.session.mark_message(&first);
        generation.session.end().await.unwrap();

        assert_eq!(broker.committed_offset("group", "sessions", 0), Some(2));
    }

    #[tokio::test]
    async fn end_claims_when_the_group_rebalances() {
        let broker = MemoryBroker::builder().partitions(2).build();

        let first = MemoryGroupTransport::new(broker.clone(), "group".into(), StartOffset::Earliest);
        let mut generation = first.join(&topics(), CancellationToken::new()).await.unwrap();
        assert_eq!(generation.claims.len(), 2);

        let second = MemoryGroupTransport::new(broker.clone(), "group".into(), StartOffset::Earliest);
        second.join(&topics(), CancellationToken::new()).await.unwrap();

        let messages = generation.claims.remove(0).messages;
        let ended = timeout(Duration::from_secs(1), messages.collect::<Vec<_>>()).await;

        assert_eq!(ended.unwrap(), vec![]);
        assert!(generation.session.context().is_cancelled());
    }

    #[tokio::test]
    async fn hand_marked_offsets_to_the_next_owner() {
        let broker = MemoryBroker::builder().partitions(2).build();

        let first = MemoryGroupTransport::new(broker.clone(), "group".into(), StartOffset::Earliest);
        let generation = first.join(&topics(), CancellationToken::new()).await.unwrap();
        let marked = ConsumerMessage {
            topic: "sessions".into(),
            partition: 1,
            offset: 4,
            key: "key".into(),
            payload: Vec::new(),
            timestamp: chrono::Utc::now(),
        };
        generation.session.mark_message(&marked);

        let second = MemoryGroupTransport::new(broker.clone(), "group".into(), StartOffset::Earliest);
        let taken_over = second.join(&topics(), CancellationToken::new()).await.unwrap();

        assert_eq!(taken_over.claims.len(), 1);
        assert_eq!(taken_over.claims[0].partition, 1);
        assert_eq!(taken_over.claims[0].initial_offset, 5);

        // Marks of the revoked generation no longer reach the broker
        generation.session.mark_message(&ConsumerMessage { offset: 2, ..marked });
        generation.session.end().await.unwrap();
        assert_eq!(broker.committed_offset("group", "sessions", 1), Some(5));
    }

    #[tokio::test]
    async fn end_claims_on_cancellation() {
        let broker = MemoryBroker::default();
        let token = CancellationToken::new();

        let transport = MemoryGroupTransport::new(broker, "group".into(), StartOffset::Earliest);
        let mut generation = transport.join(&topics(), token.clone()).await.unwrap();
        token.cancel();

        let messages = generation.claims.remove(0).messages;
        let ended = timeout(Duration::from_secs(1), messages.collect::<Vec<_>>()).await;

        assert!(ended.is_ok());
    }

    #[tokio::test]
    async fn reset_out_of_range_offsets() {
        let broker = MemoryBroker::builder().partitions(1).build();
        publish(&broker, 1).await;

        let mut transport = MemoryGroupTransport::new(broker, "group".into(), StartOffset::Offset(10));
        let errors = transport.errors().unwrap();
        let generation = transport.join(&topics(), CancellationToken::new()).await.unwrap();

        assert_eq!(generation.claims[0].initial_offset, 1);

        transport.close().await.unwrap();
        let reported: Vec<String> = errors.map(|error| error.to_string()).collect().await;
        assert_eq!(reported.len(), 1);
        assert!(reported[0].contains("out of range"));
    }

    #[tokio::test]
    async fn commit_and_leave_on_close() {
        let broker = MemoryBroker::builder().partitions(1).build();
        publish(&broker, 1).await;

        let transport = MemoryGroupTransport::new(broker.clone(), "group".into(), StartOffset::Latest);
        let generation = transport.join(&topics(), CancellationToken::new()).await.unwrap();
        assert_eq!(generation.claims[0].initial_offset, 1);

        let message = broker.read("sessions", 0, 0).unwrap();
        generation.session.mark_message(&message);
        transport.close().await.unwrap();

        assert_eq!(broker.committed_offset("group", "sessions", 0), Some(1));
        assert!(broker.members("group").is_empty());
        assert!(transport.close().await.is_err());
        assert!(transport.join(&topics(), CancellationToken::new()).await.is_err());
    }
}
