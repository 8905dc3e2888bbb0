//! Implementations of traits from the [`transport`](crate::transport) module

pub mod json;
pub mod memory;
