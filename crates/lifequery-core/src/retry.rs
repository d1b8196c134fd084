//! Retry with exponential backoff for transient failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::defaults::{TRANSIENT_BACKOFF_BASE_MS, TRANSIENT_MAX_RETRIES};
use crate::{Error, Result};

/// Run `op` and retry it on [`Error::Transient`], up to
/// [`TRANSIENT_MAX_RETRIES`] extra attempts with exponential backoff.
/// Any other error returns immediately.
pub async fn with_retries<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(Error::Transient(msg)) if attempt < TRANSIENT_MAX_RETRIES => {
                attempt += 1;
                let delay = TRANSIENT_BACKOFF_BASE_MS * (1u64 << (attempt - 1));
                warn!(
                    op = what,
                    attempt,
                    delay_ms = delay,
                    error = %msg,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Transient("hiccup".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Transient("still down".into())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1 + TRANSIENT_MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_non_transient_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Upstream("401".into())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Upstream(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
