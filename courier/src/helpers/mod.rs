//! Various small helper functions

mod backoff;

pub use backoff::Backoff;

use std::num::ParseIntError;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Parses a Duration from a string containing milliseconds.
/// Useful for command line parsing
pub fn parse_millis(src: &str) -> Result<Duration, ParseIntError> {
    let millis = src.parse::<u64>()?;
    Ok(Duration::from_millis(millis))
}

/// Locks a mutex, ignoring poisoning since no invariant guarded by the crate spans more than one critical section
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
