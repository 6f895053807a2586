//! Fail-open utilities for best-effort operations
//!
//! Stopping bots is best-effort: one bot refusing to stop must not keep the
//! rest of the workspace running. Failures are logged and swallowed.
//!
//! DO NOT use fail-open for:
//! - Building or starting bots (callers must see those errors)
//! - Settings normalization before the root bot starts

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// # Usage
///
/// ```no_run
/// use botrun_core::fail_open::fail_open;
/// use botrun_core::Result;
///
/// async fn stop_bot() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let stopped = fail_open("stop skill-a", || stop_bot()).await;
///     // stopped is None if stop_bot() failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}
