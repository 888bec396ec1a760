//! Ingestion provider interface and fetch retry policy.
//!
//! The raw block/log fetcher (RPC polling, rate limiting) is an external
//! collaborator; the core only requires that it can serve heads, headers, and
//! per-block logs on demand, and that it fails with typed errors rather than
//! crashing.

use std::{future::Future, time::Duration};

use async_trait::async_trait;

use crate::{
    error::ProviderError,
    types::{BlockHead, RawLog},
};

/// Read access to one chain, as provided by the ingestion collaborator.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The provider's current chain head.
    async fn head(&self) -> Result<BlockHead, ProviderError>;

    /// Header at `number` on the provider's current canonical chain.
    async fn block_by_number(&self, number: u64) -> Result<Option<BlockHead>, ProviderError>;

    /// Header by hash — works for orphaned blocks too, which the ancestor
    /// walk depends on.
    async fn block_by_hash(&self, hash: &str) -> Result<Option<BlockHead>, ProviderError>;

    /// All logs emitted in the block with the given hash.
    async fn logs_in_block(&self, hash: &str) -> Result<Vec<RawLog>, ProviderError>;
}

// ─── Retry policy ─────────────────────────────────────────────────────────────

/// Configuration for the fetch retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Initial backoff delay.
    pub initial_backoff: Duration,
    /// Maximum backoff delay (caps exponential growth).
    pub max_backoff: Duration,
    /// Multiplier applied to the backoff on each retry.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

/// Stateless exponential backoff — computes the delay for a given attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based), or `None`
    /// once `max_retries` is exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.config.max_retries {
            return None;
        }
        let base_ms = self.config.initial_backoff.as_millis() as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let capped = base_ms.min(self.config.max_backoff.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Total tries this policy allows (first try + retries).
    pub fn max_attempts(&self) -> u32 {
        self.config.max_retries + 1
    }
}

/// A fetch that failed every allowed attempt.
#[derive(Debug)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last: ProviderError,
}

/// Run `op` with a per-attempt timeout and exponential backoff between
/// attempts. Every timeout counts as a failed attempt; the last error is
/// returned once the policy is exhausted.
pub async fn fetch_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    timeout: Duration,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let error = match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => ProviderError::Timeout {
                ms: timeout.as_millis() as u64,
            },
        };

        match policy.next_delay(attempt) {
            Some(delay) => {
                tracing::debug!(attempt, ?delay, error = %error, "fetch failed, retrying");
                tokio::time::sleep(delay).await;
            }
            None => return Err(RetryExhausted { attempts: attempt, last: error }),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            multiplier: 2.0,
        })
    }

    #[test]
    fn delay_progression() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        });
        assert_eq!(policy.next_delay(1).unwrap().as_millis(), 100);
        assert_eq!(policy.next_delay(2).unwrap().as_millis(), 200);
        assert_eq!(policy.next_delay(3).unwrap().as_millis(), 400);
        assert!(policy.next_delay(4).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            multiplier: 10.0,
        });
        assert!(policy.next_delay(5).unwrap() <= Duration::from_millis(500));
    }

    #[tokio::test]
    async fn retry_until_success() {
        let calls = AtomicU32::new(0);
        let result = fetch_with_retry(&fast_policy(3), Duration::from_secs(1), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::Rpc("transient".into()))
            } else {
                Ok(42u32)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_reports_attempts() {
        let result: Result<(), _> =
            fetch_with_retry(&fast_policy(2), Duration::from_secs(1), || async {
                Err(ProviderError::Rpc("down".into()))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 3); // first try + 2 retries
        assert!(matches!(err.last, ProviderError::Rpc(_)));
    }

    #[tokio::test]
    async fn timeout_counts_as_failed_attempt() {
        let result: Result<(), _> =
            fetch_with_retry(&fast_policy(1), Duration::from_millis(10), || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err.last, ProviderError::Timeout { ms: 10 }));
    }
}
