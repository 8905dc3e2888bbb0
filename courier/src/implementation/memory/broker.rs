use super::{MemoryAsyncTransport, MemoryBrokerError, MemoryGroupTransport, MemorySyncTransport};
use crate::helpers::lock;
use crate::options::{BrokerOptions, ConsumerOptions};
use crate::transport::{ConsumerMessage, Placement, Record, TransportFactory};
use crate::BoxedError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Host under which a broker is reachable by default
pub const DEFAULT_HOST: &str = "memory:9092";

/// FNV-1a hash of the key reduced to a partition index
fn partition_for(key: &str, partitions: usize) -> i32 {
    let mut hash: u32 = 0x811c_9dc5;

    for byte in key.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }

    (hash as usize % partitions.max(1)) as i32
}

struct StoredRecord {
    key: String,
    payload: Vec<u8>,
    timestamp: DateTime<Utc>,
}

/// Offsets marked by one session which have not been committed yet
pub(super) type StagedOffsets = Arc<Mutex<HashMap<(String, i32), i64>>>;

struct GroupState {
    members: BTreeSet<String>,
    generation: watch::Sender<u64>,
    committed: HashMap<(String, i32), i64>,
    sessions: HashMap<String, StagedOffsets>,
}

impl GroupState {
    fn new() -> Self {
        let (generation, _) = watch::channel(0);

        Self {
            members: BTreeSet::new(),
            generation,
            committed: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    /// Commits what the sessions of the current generation staged and moves on to the next one
    ///
    /// Sessions are deregistered, marks they stage afterwards belong to a stale generation.
    fn rebalance(&mut self) {
        for (_, staged) in self.sessions.drain() {
            self.committed.extend(std::mem::take(&mut *lock(&*staged)));
        }

        self.generation.send_modify(|generation| *generation += 1);
    }
}

/// Partitions assigned to a member for one generation
pub(super) struct Membership {
    pub generation: u64,
    pub changes: watch::Receiver<u64>,
    pub assignment: Vec<(String, i32)>,
}

struct BrokerState {
    hosts: Vec<String>,
    partitions: usize,
    ack_latency: Duration,
    queue_capacity: usize,
    topics: Mutex<HashMap<String, Vec<Vec<StoredRecord>>>>,
    groups: Mutex<HashMap<String, GroupState>>,
    rejected: Mutex<HashSet<String>>,
    failing_joins: AtomicUsize,
    members: AtomicU64,
    appended: watch::Sender<u64>,
}

/// Builder for [`MemoryBroker`] instances
#[derive(Debug, Clone)]
pub struct MemoryBrokerBuilder {
    hosts: Vec<String>,
    partitions: usize,
    ack_latency: Duration,
    queue_capacity: usize,
}

impl Default for MemoryBrokerBuilder {
    fn default() -> Self {
        Self {
            hosts: vec![DEFAULT_HOST.to_owned()],
            partitions: 3,
            ack_latency: Duration::ZERO,
            queue_capacity: 256,
        }
    }
}

impl MemoryBrokerBuilder {
    /// Hosts under which the broker can be reached
    pub fn hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Number of partitions for automatically created topics
    pub fn partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    /// Time the broker takes to acknowledge a record
    pub fn ack_latency(mut self, ack_latency: Duration) -> Self {
        self.ack_latency = ack_latency;
        self
    }

    /// Number of records an asynchronous transport can hold before `enqueue` waits
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);
        self
    }

    /// Creates the broker
    pub fn build(self) -> MemoryBroker {
        let (appended, _) = watch::channel(0);

        MemoryBroker {
            state: Arc::new(BrokerState {
                hosts: self.hosts,
                partitions: self.partitions,
                ack_latency: self.ack_latency,
                queue_capacity: self.queue_capacity,
                topics: Mutex::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
                rejected: Mutex::new(HashSet::new()),
                failing_joins: AtomicUsize::new(0),
                members: AtomicU64::new(0),
                appended,
            }),
        }
    }
}

/// Single-node broker which lives in the memory of the current process
///
/// Cloning is cheap and every clone refers to the same logs, groups and committed offsets.
/// Topics are created on first use. Records are spread across partitions by hashing their key.
///
/// ```
/// # use courier::implementation::memory::MemoryBroker;
/// let broker = MemoryBroker::builder().partitions(1).build();
/// assert_eq!(broker.end_offset("sessions", 0), 0);
/// ```
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        MemoryBrokerBuilder::default().build()
    }
}

impl MemoryBroker {
    /// Starts building a new broker
    pub fn builder() -> MemoryBrokerBuilder {
        MemoryBrokerBuilder::default()
    }

    /// Creates a topic with an explicit number of partitions, does nothing if it exists already
    pub fn create_topic(&self, topic: &str, partitions: usize) {
        lock(&self.state.topics)
            .entry(topic.to_owned())
            .or_insert_with(|| (0..partitions.max(1)).map(|_| Vec::new()).collect());
    }

    /// Makes every subsequent send to the topic fail
    pub fn reject_topic(&self, topic: &str) {
        lock(&self.state.rejected).insert(topic.to_owned());
    }

    /// Lets the topic accept records again
    pub fn accept_topic(&self, topic: &str) {
        lock(&self.state.rejected).remove(topic);
    }

    /// Makes the next `count` attempts to join any group fail
    pub fn fail_next_joins(&self, count: usize) {
        self.state.failing_joins.store(count, Ordering::SeqCst);
    }

    /// Number of partitions of a topic, zero if it does not exist
    pub fn partition_count(&self, topic: &str) -> usize {
        lock(&self.state.topics).get(topic).map_or(0, Vec::len)
    }

    /// Offset the next record appended to the partition will receive
    pub fn end_offset(&self, topic: &str, partition: i32) -> i64 {
        lock(&self.state.topics)
            .get(topic)
            .and_then(|partitions| partitions.get(partition as usize))
            .map_or(0, |log| log.len() as i64)
    }

    /// Offset committed by a consumer group, `None` if it never committed for the partition
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        lock(&self.state.groups)
            .get(group)
            .and_then(|state| state.committed.get(&(topic.to_owned(), partition)))
            .copied()
    }

    /// Current generation of a consumer group, zero if nobody ever joined
    pub fn generation(&self, group: &str) -> u64 {
        lock(&self.state.groups)
            .get(group)
            .map_or(0, |state| *state.generation.borrow())
    }

    /// Identifiers of the current members of a consumer group
    pub fn members(&self, group: &str) -> Vec<String> {
        lock(&self.state.groups)
            .get(group)
            .map(|state| state.members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(super) fn ack_latency(&self) -> Duration {
        self.state.ack_latency
    }

    pub(super) fn queue_capacity(&self) -> usize {
        self.state.queue_capacity
    }

    pub(super) fn connect(&self, hosts: &[String]) -> Result<(), MemoryBrokerError> {
        if hosts.iter().any(|host| self.state.hosts.contains(host)) {
            Ok(())
        } else {
            Err(MemoryBrokerError::Unreachable(hosts.to_vec()))
        }
    }

    fn ensure_topic(&self, topic: &str) -> usize {
        self.create_topic(topic, self.state.partitions);
        self.partition_count(topic)
    }

    /// Partition a record is routed to, creating nothing
    pub(super) fn route(&self, record: &Record) -> i32 {
        let partitions = match self.partition_count(&record.topic) {
            0 => self.state.partitions,
            count => count,
        };

        partition_for(&record.key, partitions)
    }

    pub(super) fn append(&self, record: &Record) -> Result<Placement, MemoryBrokerError> {
        if lock(&self.state.rejected).contains(&record.topic) {
            return Err(MemoryBrokerError::TopicRejected(record.topic.clone()));
        }

        let placement = {
            let mut topics = lock(&self.state.topics);
            let partitions = topics
                .entry(record.topic.clone())
                .or_insert_with(|| (0..self.state.partitions).map(|_| Vec::new()).collect());

            let partition = partition_for(&record.key, partitions.len());
            let log = &mut partitions[partition as usize];
            log.push(StoredRecord {
                key: record.key.clone(),
                payload: record.payload.clone(),
                timestamp: Utc::now(),
            });

            Placement {
                partition,
                offset: log.len() as i64 - 1,
            }
        };

        trace!(topic = %record.topic, ?placement, "Appended record");
        self.state.appended.send_modify(|count| *count += 1);

        Ok(placement)
    }

    pub(super) fn read(&self, topic: &str, partition: i32, offset: i64) -> Option<ConsumerMessage> {
        if offset < 0 {
            return None;
        }

        let topics = lock(&self.state.topics);
        let stored = topics.get(topic)?.get(partition as usize)?.get(offset as usize)?;

        Some(ConsumerMessage {
            topic: topic.to_owned(),
            partition,
            offset,
            key: stored.key.clone(),
            payload: stored.payload.clone(),
            timestamp: stored.timestamp,
        })
    }

    pub(super) fn subscribe_appends(&self) -> watch::Receiver<u64> {
        self.state.appended.subscribe()
    }

    pub(super) fn next_member_id(&self, group: &str) -> String {
        let sequence = self.state.members.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", group, sequence)
    }

    pub(super) fn take_join_failure(&self) -> bool {
        self.state
            .failing_joins
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }

    /// Adds the member to the group and computes its share of the partitions
    ///
    /// The generation only advances when the membership actually changes, re-joining
    /// members keep the current generation. Before a new generation starts, every offset
    /// staged in the previous one is committed so the new owners of a partition resume
    /// where the old ones left off. Partitions are dealt round-robin over the members in
    /// sorted order.
    pub(super) fn join_group(
        &self,
        group: &str,
        member: &str,
        topics: &[String],
        staged: StagedOffsets,
    ) -> Membership {
        let mut groups = lock(&self.state.groups);
        let state = groups.entry(group.to_owned()).or_insert_with(GroupState::new);

        if state.members.insert(member.to_owned()) {
            state.rebalance();
            debug!(group, member, "Member joined, rebalancing");
        }

        state.sessions.insert(member.to_owned(), staged);

        let member_count = state.members.len();
        let rank = state
            .members
            .iter()
            .position(|candidate| candidate == member)
            .unwrap_or_default();

        let assignment = topics
            .iter()
            .flat_map(|topic| {
                let partitions = self.ensure_topic(topic);
                (0..partitions)
                    .filter(move |partition| partition % member_count == rank)
                    .map(move |partition| (topic.clone(), partition as i32))
            })
            .collect();

        let generation = *state.generation.borrow();

        Membership {
            generation,
            changes: state.generation.subscribe(),
            assignment,
        }
    }

    pub(super) fn leave_group(&self, group: &str, member: &str) {
        if let Some(state) = lock(&self.state.groups).get_mut(group) {
            if state.members.remove(member) {
                state.rebalance();
                debug!(group, member, "Member left, rebalancing");
            }
        }
    }

    /// Commits offsets staged by a session of the given generation
    ///
    /// Commits of a generation the group has already left behind are rejected. Returns
    /// whether the offsets have been accepted.
    pub(super) fn commit(
        &self,
        group: &str,
        generation: u64,
        offsets: HashMap<(String, i32), i64>,
    ) -> bool {
        if offsets.is_empty() {
            return true;
        }

        let mut groups = lock(&self.state.groups);
        let state = match groups.get_mut(group) {
            Some(state) if *state.generation.borrow() == generation => state,
            _ => {
                debug!(group, generation, "Rejecting commit of a stale generation");
                return false;
            }
        };

        for ((topic, partition), offset) in offsets {
            trace!(group, %topic, partition, offset, "Committing offset");
            state.committed.insert((topic, partition), offset);
        }

        true
    }
}

#[async_trait]
impl TransportFactory for MemoryBroker {
    type SyncTransport = MemorySyncTransport;
    type AsyncTransport = MemoryAsyncTransport;
    type GroupTransport = MemoryGroupTransport;

    async fn sync_transport(
        &self,
        broker: &BrokerOptions,
    ) -> Result<Self::SyncTransport, BoxedError> {
        self.connect(&broker.hosts)?;
        Ok(MemorySyncTransport::new(self.clone()))
    }

    async fn async_transport(
        &self,
        broker: &BrokerOptions,
    ) -> Result<Self::AsyncTransport, BoxedError> {
        self.connect(&broker.hosts)?;
        Ok(MemoryAsyncTransport::spawn(self.clone()))
    }

    async fn group_transport(
        &self,
        options: &ConsumerOptions,
    ) -> Result<Self::GroupTransport, BoxedError> {
        self.connect(&options.broker.hosts)?;
        Ok(MemoryGroupTransport::new(
            self.clone(),
            options.group_id.clone(),
            options.start_from,
        ))
    }
}
