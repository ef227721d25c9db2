//! Helpers for side work that must never fail the caller
//!
//! Timeline files and similar reports are conveniences. Losing one is
//! logged, but the engine operation that triggered it still succeeds. Never
//! use this for anything that feeds the journal.

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Run `f`, logging and swallowing any error
///
/// Returns `None` when the operation failed.
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (ignored): {}", operation_name, e);
            None
        }
    }
}
