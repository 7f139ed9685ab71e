//! Retry utilities with exponential backoff for resilient source calls.
//!
//! Sources never retry on their own; [`RetryingSource`] wraps one and applies
//! a [`RetryConfig`] to every page fetch. Cancellation interrupts both the
//! fetch and any backoff sleep.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::models::{ContinuationToken, Query, ResultPage};
use crate::sources::{SourceError, SourceSearchClient};

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Set the maximum number of attempts
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Backoff delay after `attempt` failed attempts
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powf(attempt.saturating_sub(1) as f64);
        Duration::from_secs_f64(exp.min(self.max_delay.as_secs_f64()))
    }
}

/// Transient errors that should trigger a retry
#[derive(Debug, Clone, PartialEq)]
pub enum TransientError {
    /// Network connectivity issues
    Network,
    /// Rate limit exceeded
    RateLimit,
    /// Service unavailable
    ServiceUnavailable,
    /// Request timeout
    Timeout,
}

impl TransientError {
    /// Check if a SourceError represents a transient error
    pub fn from_source_error(err: &SourceError) -> Option<Self> {
        match err {
            SourceError::RateLimit => Some(TransientError::RateLimit),
            SourceError::Network(msg) => {
                if msg.to_lowercase().contains("timed out") {
                    Some(TransientError::Timeout)
                } else {
                    Some(TransientError::Network)
                }
            }
            SourceError::Api(msg) => {
                // Heuristic: check for common transient error patterns in messages
                let msg_lower = msg.to_lowercase();
                if msg_lower.contains("timeout") {
                    Some(TransientError::Timeout)
                } else if msg_lower.contains("service unavailable")
                    || msg_lower.contains("temporarily unavailable")
                    || msg_lower.contains("503")
                {
                    Some(TransientError::ServiceUnavailable)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Minimum delay recommended for this error
    pub fn recommended_delay(&self) -> Duration {
        match self {
            TransientError::RateLimit => Duration::from_secs(2),
            TransientError::ServiceUnavailable => Duration::from_secs(1),
            TransientError::Timeout | TransientError::Network => Duration::ZERO,
        }
    }
}

/// Execute an async operation with retry logic
///
/// Permanent errors and cancellation are returned immediately. Transient
/// errors are retried until `config.max_attempts` is reached.
pub async fn with_retry<T, F, Fut>(
    config: RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        let error = match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    tracing::info!(
                        "Operation succeeded on attempt {} after {} transient failures",
                        attempts,
                        attempts - 1
                    );
                }
                return Ok(result);
            }
            Err(error) => error,
        };

        let Some(transient) = TransientError::from_source_error(&error) else {
            return Err(error);
        };

        if attempts >= config.max_attempts {
            tracing::warn!("Operation failed after {} attempts: {}", attempts, error);
            return Err(error);
        }

        let delay = config
            .backoff(attempts)
            .max(transient.recommended_delay())
            .min(config.max_delay);
        tracing::debug!(
            "Transient error on attempt {}: {:?}, retrying in {:?}",
            attempts,
            transient,
            delay
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            _ = sleep(delay) => {}
        }
    }
}

/// A source wrapper that retries transient failures
#[derive(Debug, Clone)]
pub struct RetryingSource {
    inner: Arc<dyn SourceSearchClient>,
    config: RetryConfig,
}

impl RetryingSource {
    /// Wrap `inner` with `config`
    pub fn new(inner: Arc<dyn SourceSearchClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// The wrapped source
    pub fn inner(&self) -> &Arc<dyn SourceSearchClient> {
        &self.inner
    }
}

#[async_trait]
impl SourceSearchClient for RetryingSource {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_page(
        &self,
        query: &Query,
        token: Option<&ContinuationToken>,
        cancel: &CancellationToken,
    ) -> Result<ResultPage, SourceError> {
        with_retry(self.config, cancel, move || {
            self.inner.fetch_page(query, token, cancel)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::ScriptedSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();

        let result = with_retry(fast_config(4), &cancel, || {
            let count = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if count < 3 {
                    Err(SourceError::Network("temporary error".to_string()))
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_permanent_error() {
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();

        let result: Result<(), SourceError> = with_retry(fast_config(5), &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SourceError::NotFound("not found".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(SourceError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let cancel = CancellationToken::new();

        let result: Result<(), SourceError> = with_retry(fast_config(2), &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SourceError::Network("down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(SourceError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        let config = RetryConfig {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            ..fast_config(3)
        };

        let trigger = cancel.clone();
        let result: Result<(), SourceError> = with_retry(config, &cancel, || {
            trigger.cancel();
            async { Err(SourceError::RateLimit) }
        })
        .await;

        assert_eq!(result, Err(SourceError::Cancelled));
    }

    #[tokio::test]
    async fn test_retrying_source_delegates() {
        let source = ScriptedSource::new("feed").page_of(&[("A", "1.0.0")]);
        let retrying = RetryingSource::new(Arc::new(source), fast_config(3));
        assert_eq!(retrying.id(), "feed");

        let page = retrying
            .fetch_page(&Query::new("a"), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn test_transient_error_detection() {
        assert!(TransientError::from_source_error(&SourceError::RateLimit).is_some());
        assert!(TransientError::from_source_error(&SourceError::Network("reset".into())).is_some());
        assert_eq!(
            TransientError::from_source_error(&SourceError::Api("503 Service Unavailable".into())),
            Some(TransientError::ServiceUnavailable)
        );
        assert!(TransientError::from_source_error(&SourceError::Parse("bad json".into())).is_none());
        assert!(TransientError::from_source_error(&SourceError::Cancelled).is_none());
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(3), Duration::from_millis(250));
    }
}
