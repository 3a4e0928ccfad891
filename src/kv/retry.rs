//! Bounded retries for backend calls
//!
//! Transient (connection-level) failures are retried with a linear backoff
//! and an opportunistic reconnect between attempts. Anything else fails on
//! the first attempt.

use crate::core::config::RetryConfig;
use crate::core::error::Result;
use crate::kv::KvClient;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (0-indexed): `base * (attempt + 1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt + 1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

/// Runs operations against a client, retrying transient failures
#[derive(Clone)]
pub struct RetryWrapper {
    client: Arc<dyn KvClient>,
    policy: RetryPolicy,
}

impl RetryWrapper {
    pub fn new(client: Arc<dyn KvClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn client(&self) -> &Arc<dyn KvClient> {
        &self.client
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out
    ///
    /// The final underlying error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        backend = self.client.label(),
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient backend error, retrying"
                    );
                    tokio::time::sleep(delay).await;

                    if !self.client.is_open() {
                        if let Err(err) = self.client.connect().await {
                            warn!(backend = self.client.label(), error = %err, "Reconnect failed");
                        }
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::VodError;
    use crate::kv::MemoryClient;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn wrapper() -> RetryWrapper {
        RetryWrapper::new(Arc::new(MemoryClient::new()), RetryPolicy::default())
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let retry = wrapper();
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let started = tokio::time::Instant::now();

        let result = retry
            .run(move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(VodError::BackendError("connect ECONNREFUSED 127.0.0.1:6379".into()))
                } else {
                    Ok("value")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "value");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_fails_once() {
        let retry = wrapper();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<()> = retry
            .run(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(VodError::BackendError("ERR syntax error".into()))
            })
            .await;

        assert!(matches!(result, Err(VodError::BackendError(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_last_error() {
        let retry = wrapper();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<()> = retry
            .run(move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err(VodError::connection("Redis", format!("socket closed #{}", n)))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("#3"));
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig { max_retries: 5, base_delay_ms: 0 });
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.delay_for(4), Duration::ZERO);
    }
}
