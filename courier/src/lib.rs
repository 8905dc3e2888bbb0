//! Message broker client facade with delivery and commit semantics
//!
//! This crate wraps a lower-level pub/sub client (the [`transport`]) and provides
//! three ways of talking to a broker:
//!
//! 1. [`SyncPublisher`](producer::SyncPublisher) which blocks until the broker acknowledged a send
//! 2. [`AsyncPublisher`](producer::AsyncPublisher) which only enqueues and reports outcomes in the background
//! 3. [`ConsumerGroup`](consumer::ConsumerGroup) which dispatches [`Envelopes`](Envelope) to user logic
//!    and decides per message whether the committed offset advances
//!
//! Every operation is decorated with structured events through a [`DiagnosticEmitter`](diagnostics::DiagnosticEmitter).
//! Per-message failures never cross into unrelated operations, they only ever show up in the
//! diagnostic stream. Synchronous publishing is the one exception and returns its error to the caller.
//!
//! Partitioning, leader discovery, rebalancing and wire encoding are delegated to the
//! [`transport`] implementations. An [in-memory broker](implementation::memory) is shipped
//! with the crate which is used for tests and simulations.

#![deny(missing_docs)]

mod envelope;
mod error;

pub mod consumer;
pub mod diagnostics;
pub mod helpers;
pub mod implementation;
pub mod options;
pub mod producer;
pub mod transport;

pub use envelope::Envelope;
pub use error::CourierError;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result with no value and a [`BoxedError`]
pub type EmptyResult = Result<(), BoxedError>;
