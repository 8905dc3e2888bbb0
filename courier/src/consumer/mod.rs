//! Consumer group dispatching [`Envelopes`](crate::Envelope) to user logic
//!
//! A [`ConsumerGroup`] repeatedly joins its group until it is cancelled. Every generation
//! hands out a set of partition claims and each claim is processed by its own task, strictly
//! in partition order. After a message has been handled its offset is marked as processed
//! unless the handler failed and failures are not supposed to be committed.
//!
//! Messages which can not be decoded are reported and skipped without being marked. They
//! will only be seen again when the group restarts from an earlier committed offset.

mod dispatcher;
mod group;
mod handler;

pub use group::*;
pub use handler::*;
