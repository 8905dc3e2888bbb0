//! Trait implementations using an in-process broker
//!
//! The [`MemoryBroker`] keeps partitioned topic logs, consumer group memberships and committed
//! offsets in memory. It behaves like a single-node cluster and is used for tests, simulations
//! and local development. Faults can be injected to exercise the failure paths of the
//! publishers and consumer groups.

mod broker;
mod group;
mod producer;

pub use broker::*;
pub use group::*;
pub use producer::*;

use thiserror::Error;

/// Errors reported by the in-memory transports
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryBrokerError {
    /// None of the bootstrap hosts are served by the broker
    #[error("none of the hosts {0:?} are served by this broker")]
    Unreachable(Vec<String>),
    /// Topic has been configured to refuse records
    #[error("topic '{0}' does not accept records")]
    TopicRejected(String),
    /// Join failure requested by [`MemoryBroker::fail_next_joins`]
    #[error("group coordinator not available")]
    CoordinatorUnavailable,
    /// Requested start offset does not exist yet
    #[error("offset {offset} out of range for {topic}/{partition}, resetting to {reset_to}")]
    OffsetOutOfRange {
        /// Topic of the claim
        topic: String,
        /// Partition of the claim
        partition: i32,
        /// Offset that has been requested
        offset: i64,
        /// Offset the claim starts from instead
        reset_to: i64,
    },
    /// Transport has already been closed
    #[error("transport has been closed")]
    Closed,
}
