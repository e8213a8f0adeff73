use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{Operation, ProviderError, SyncError, SyncResult};

const LOG_TARGET: &str = "table_sync::decryption::retry";

/// Fixed-delay, bounded retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            delay: config.decrypt_retry_delay,
            max_attempts: config.decrypt_max_attempts.max(1),
        }
    }
}

/// Runs `attempt` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent. Only transient provider errors are retried.
pub async fn retry_transient<T, F, Fut>(
    operation: Operation,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut attempt: F,
) -> SyncResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    let mut number = 1;
    loop {
        let last: ProviderError = match attempt(number).await {
            Ok(value) => {
                if number > 1 {
                    debug!(target: LOG_TARGET, %operation, attempt = number, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(SyncError::Provider(err)) if err.is_retryable() => err,
            Err(err) => return Err(err),
        };

        if number >= policy.max_attempts {
            warn!(
                target: LOG_TARGET,
                %operation,
                attempts = number,
                error = %last,
                "giving up"
            );
            return Err(SyncError::RetriesExhausted {
                operation,
                attempts: number,
                last,
            });
        }

        debug!(
            target: LOG_TARGET,
            %operation,
            attempt = number,
            delay_ms = policy.delay.as_millis() as u64,
            error = %last,
            "transient failure, retrying"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = tokio::time::sleep(policy.delay) => {}
        }
        number += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_secs(3),
            max_attempts: 10,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn not_dealt_is_attempted_at_most_ten_times() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result: SyncResult<()> =
            retry_transient(Operation::HoleCards, policy(), &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let err = ProviderError::NotYetAvailable("not dealt".into());
                async { Err::<(), _>(SyncError::from(err)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 10);
        assert_eq!(started.elapsed(), Duration::from_secs(27));
        let err = result.unwrap_err();
        assert!(matches!(err, SyncError::RetriesExhausted { attempts: 10, .. }));
        assert!(err.is_user_facing());
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: SyncResult<()> =
            retry_transient(Operation::HoleCards, policy(), &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SyncError::from(ProviderError::NotSeated(1))) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            result,
            Err(SyncError::Provider(ProviderError::NotSeated(1)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_once_the_value_appears() {
        let result = retry_transient(
            Operation::CommunityCards,
            policy(),
            &CancellationToken::new(),
            |attempt| async move {
                if attempt < 3 {
                    Err(SyncError::from(ProviderError::Unavailable("gateway".into())))
                } else {
                    Ok(attempt)
                }
            },
        )
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        let result: SyncResult<()> =
            retry_transient(Operation::CommunityCards, policy(), &cancel, |_| {
                trip.cancel();
                let err = ProviderError::NotYetAvailable("flop".into());
                async { Err::<(), _>(SyncError::from(err)) }
            })
            .await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }
}
