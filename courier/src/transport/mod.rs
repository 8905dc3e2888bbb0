//! Contracts for the lower-level broker client
//!
//! Implementations of these traits own the actual connection to the brokers and are
//! responsible for partitioning, leader discovery, rebalancing, retries and wire encoding.
//! The publishers and the consumer group in this crate only ever talk to a broker through them.
//!
//! There are three kinds of transports:
//!
//! - [`SyncTransport`] sends one record and waits for the broker to acknowledge it
//! - [`AsyncTransport`] queues records and reports their outcome on two separate [streams](DeliveryReports)
//! - [`GroupTransport`] joins a consumer group and hands out [`Claims`](Claim) for one [`Generation`]
//!
//! A [`TransportFactory`] bundles all three for a given broker cluster.

mod factory;
mod group;
mod producer;
mod record;

pub use factory::*;
pub use group::*;
pub use producer::*;
pub use record::*;
