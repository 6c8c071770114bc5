//! Flood-aware sending
//!
//! Wraps a single transport call in a loop that honours the transport's
//! flood control. The advertised wait is authoritative: no retry ceiling,
//! no exponential growth, no jitter. Only the calling task sleeps.

use std::future::Future;
use tracing::{debug, warn};

use super::abstraction::TransportError;

/// Run `send_once` until it stops reporting rate limits.
///
/// `RateLimited { retry_after }` sleeps for exactly `retry_after` and
/// retries. Success and hard failures are returned as-is.
pub async fn send_with_backoff<T, F, Fut>(mut send_once: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut waits: u64 = 0;
    loop {
        match send_once().await {
            Err(TransportError::RateLimited { retry_after }) => {
                waits += 1;
                warn!(
                    "Flood wait #{}: transport asked to retry after {:?}",
                    waits, retry_after
                );
                tokio::time::sleep(retry_after).await;
            }
            other => {
                if waits > 0 {
                    debug!("Send settled after {} flood waits", waits);
                }
                return other;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_waits_advertised_duration_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result = send_with_backoff(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(TransportError::RateLimited {
                        retry_after: Duration::from_secs(7),
                    })
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        let elapsed = start.elapsed();
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(elapsed >= Duration::from_secs(7));
        assert!(elapsed < Duration::from_secs(7) + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_retry_ceiling() {
        let attempts = AtomicU32::new(0);

        let result = send_with_backoff(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 200 {
                    Err(TransportError::RateLimited {
                        retry_after: Duration::from_millis(500),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(200));
    }

    #[tokio::test]
    async fn test_hard_failure_not_retried() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = send_with_backoff(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(TransportError::Hard("channel gone".into())) }
        })
        .await;

        assert_eq!(result, Err(TransportError::Hard("channel gone".into())));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_only_its_own_task() {
        let slow = tokio::spawn(async {
            send_with_backoff(|| async {
                Err::<(), _>(TransportError::RateLimited {
                    retry_after: Duration::from_secs(3600),
                })
            })
            .await
        });

        let fast = send_with_backoff(|| async { Ok::<_, TransportError>("done") }).await;
        assert_eq!(fast, Ok("done"));
        assert!(!slow.is_finished());
        slow.abort();
    }
}
