//! Bounded retry combinators
//!
//! Both combinators re-run an operation until it succeeds or its retry
//! budget is exhausted. A budget of `n` allows at most `n + 1` invocations;
//! the error of the last invocation is the one returned.
//!
//! Failed attempts are not rolled back. The wrapped operation must be safe to
//! run again (idempotent, or bounded in its side effects).
//!
//! # Example
//!
//! ```
//! use catalog_harvest::retry::retry;
//!
//! let mut calls = 0;
//! let result: Result<u32, &str> = retry(2, || {
//!     calls += 1;
//!     if calls < 3 { Err("not yet") } else { Ok(calls) }
//! });
//! assert_eq!(result, Ok(3));
//! ```

use std::fmt::Display;
use std::future::Future;

/// Runs a synchronous operation with up to `budget` retries
pub fn retry<T, E, F>(budget: u32, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: Display,
{
    let mut remaining = budget;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) if remaining > 0 => {
                tracing::debug!(
                    error = %e,
                    attempt = budget - remaining + 1,
                    remaining,
                    "Operation failed, retrying"
                );
                remaining -= 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Runs an asynchronous operation with up to `budget` retries
///
/// `operation` is called once per attempt and must produce a fresh future
/// each time.
pub async fn retry_async<T, E, F, Fut>(budget: u32, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut remaining = budget;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if remaining > 0 => {
                tracing::debug!(
                    error = %e,
                    attempt = budget - remaining + 1,
                    remaining,
                    "Operation failed, retrying"
                );
                remaining -= 1;
            }
            Err(e) => return Err(e),
        }
    }
}
