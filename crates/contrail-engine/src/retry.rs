//! Async retry execution over the shared policy.
//!
//! The backoff math lives in `contrail-core`; this is the tokio side.
//! Every retry site in the engine goes through [`retry`] instead of
//! hand-rolling its own loop.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use contrail_core::RetryConfig;

/// Run `op` up to `config.max_attempts` times, sleeping a jittered
/// exponential backoff between attempts.
///
/// `should_retry` inspects each error; returning false stops immediately
/// (e.g. a 4xx that will never succeed). The last error is returned when
/// attempts are exhausted.
pub async fn retry<T, E, F, Fut, P>(
    config: &RetryConfig,
    label: &str,
    mut op: F,
    mut should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: FnMut(&E) -> bool,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= config.max_attempts.max(1) || !should_retry(&e) {
                    return Err(e);
                }
                let delay = config.delay_for(attempt - 1, rand::random::<f64>());
                warn!(attempt, delay_ms = delay, "{label} failed, retrying: {e}");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
