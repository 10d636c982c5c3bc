//! Bounded retry for venue order submissions.

use crate::config::ExecutionConfig;
use crate::exchange::OrderAck;
use anyhow::{anyhow, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Attempt budget, spacing and per-attempt timeout for one order action.
///
/// A timeout, a transport error and an `ok == false` acknowledgement all
/// count as a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn once(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            timeout,
        }
    }

    /// Taker leg of an open.
    pub fn leg_b(config: &ExecutionConfig) -> Self {
        Self {
            max_attempts: config.leg_b_max_attempts.max(1),
            delay: Duration::from_millis(config.leg_b_retry_delay_ms),
            timeout: config.order_timeout(),
        }
    }

    /// Compensating and cleanup closes.
    pub fn rollback(config: &ExecutionConfig) -> Self {
        Self {
            max_attempts: config.rollback_max_attempts.max(1),
            delay: Duration::from_millis(config.rollback_retry_delay_ms),
            timeout: config.rollback_timeout(),
        }
    }

    /// Run `submit` until it returns a filled acknowledgement or the
    /// budget is spent. Returns the last failure otherwise.
    pub async fn run<F, Fut>(&self, action: &str, symbol: &str, mut submit: F) -> Result<OrderAck>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<OrderAck>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let error = match tokio::time::timeout(self.timeout, submit()).await {
                Ok(Ok(ack)) if ack.ok => return Ok(ack),
                Ok(Ok(_)) => anyhow!("{} rejected by venue", action),
                Ok(Err(e)) => e,
                Err(_) => anyhow!("{} timed out after {:?}", action, self.timeout),
            };

            warn!(
                %symbol,
                action,
                attempt,
                max_attempts,
                error = %error,
                "Order attempt failed"
            );
            last_error = Some(error);

            if attempt < max_attempts && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("{} not attempted", action)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_succeeds_on_second_attempt() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast_policy(2)
            .run("open", "BTC-USD", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(OrderAck::rejected())
                } else {
                    Ok(OrderAck::filled("LIT-7", None))
                }
            })
            .await;

        assert_eq!(result.unwrap().order_ref.as_deref(), Some("LIT-7"));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_budget_returns_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast_policy(3)
            .run("close", "ETH-USD", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("connection reset"))
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let policy = RetryPolicy::once(Duration::from_millis(10));
        let result = policy
            .run("open", "SOL-USD", || async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(OrderAck::filled("X10-1", None))
            })
            .await;

        assert!(result.unwrap_err().to_string().contains("timed out"));
    }

    #[test]
    fn test_policies_from_config() {
        let config = ExecutionConfig::default();
        let leg_b = RetryPolicy::leg_b(&config);
        assert_eq!(leg_b.max_attempts, 2);
        assert_eq!(leg_b.delay, Duration::from_secs(1));
        assert_eq!(RetryPolicy::rollback(&config).timeout, Duration::from_secs(5));
    }
}
