//! AI generation client: `generate(prompt, images) -> text`.
//!
//! [`LlmBackend`] is the single-attempt seam: one request, one reply, and a
//! classification of failures into transient or permanent. [`AiClient`] wraps
//! a backend with the retry policy every step shares.
//!
//! ## Retry Strategy
//!
//! Rate-limit and overload errors are frequent when six chapters are being
//! written at once. Exponential backoff (`base * 2^(attempt-1)`, capped)
//! spreads the retries out: with the defaults the waits are 1 s then 2 s.
//! Permanent failures (bad key, invalid request, content policy) are never
//! retried.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use edgequake_llm::ImageData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// One request/response exchange with a language model.
///
/// Implementations make exactly one attempt and must report retryable
/// failures as [`PipelineError::TransientApi`].
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Short name for logs, e.g. `"gemini/gemini-2.5-pro"`.
    fn name(&self) -> String;

    async fn complete(&self, prompt: &str, images: &[ImageData]) -> Result<String>;
}

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff_ms: config.retry_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(
            self.base_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// Retrying front end to an [`LlmBackend`]. Cheap to clone.
#[derive(Clone)]
pub struct AiClient {
    backend: Arc<dyn LlmBackend>,
    policy: RetryPolicy,
    calls: Arc<AtomicUsize>,
}

impl AiClient {
    pub fn new(backend: Arc<dyn LlmBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn backend_name(&self) -> String {
        self.backend.name()
    }

    /// Number of backend requests made so far, retries included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Generate text for a prompt, optionally with images.
    ///
    /// Transient failures are retried up to `max_retries` times. When the
    /// budget runs out the last transient message is returned as a
    /// [`PipelineError::PermanentApi`].
    pub async fn generate(&self, prompt: &str, images: &[ImageData]) -> Result<String> {
        let mut last_err = String::new();

        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                let backoff = self.policy.backoff(attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    self.backend.name(),
                    attempt,
                    self.policy.max_retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }

            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.backend.complete(prompt, images).await {
                Ok(text) if text.trim().is_empty() => {
                    return Err(PipelineError::PermanentApi {
                        message: "model returned an empty response".into(),
                        attempts: attempt + 1,
                    });
                }
                Ok(text) => {
                    debug!(
                        "{}: {} chars after {} attempt(s)",
                        self.backend.name(),
                        text.len(),
                        attempt + 1
                    );
                    return Ok(text);
                }
                Err(PipelineError::TransientApi { message }) => {
                    warn!("{}: attempt {} failed: {}", self.backend.name(), attempt + 1, message);
                    last_err = message;
                }
                Err(PipelineError::PermanentApi { message, .. }) => {
                    return Err(PipelineError::PermanentApi {
                        message,
                        attempts: attempt + 1,
                    });
                }
                Err(other) => return Err(other),
            }
        }

        Err(PipelineError::PermanentApi {
            message: format!("retries exhausted: {last_err}"),
            attempts: self.policy.max_retries + 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed sequence of outcomes, then succeeds.
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<String>>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
            })
        }
    }

    #[async_trait]
    impl LlmBackend for Scripted {
        fn name(&self) -> String {
            "scripted".into()
        }

        async fn complete(&self, _prompt: &str, _images: &[ImageData]) -> Result<String> {
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("done".into()))
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    fn transient() -> Result<String> {
        Err(PipelineError::TransientApi {
            message: "429 Too Many Requests".into(),
        })
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_retries: 5,
            base_backoff_ms: 1000,
            max_backoff_ms: 10_000,
        };
        assert_eq!(p.backoff(1), Duration::from_millis(1000));
        assert_eq!(p.backoff(2), Duration::from_millis(2000));
        assert_eq!(p.backoff(3), Duration::from_millis(4000));
        assert_eq!(p.backoff(5), Duration::from_millis(10_000));
    }

    #[test]
    fn default_policy_waits_one_then_two_seconds() {
        let p = RetryPolicy::default();
        let waits: Vec<Duration> = (1..=p.max_retries).map(|n| p.backoff(n)).collect();
        assert_eq!(waits, vec![Duration::from_secs(1), Duration::from_secs(2)]);
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let client = AiClient::new(Scripted::new(vec![transient()]), fast_policy(2));
        let text = client.generate("p", &[]).await.unwrap();
        assert_eq!(text, "done");
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let client = AiClient::new(
            Scripted::new(vec![Err(PipelineError::PermanentApi {
                message: "401 invalid api key".into(),
                attempts: 1,
            })]),
            fast_policy(2),
        );
        let err = client.generate("p", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::PermanentApi { attempts: 1, .. }));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_become_permanent() {
        let client = AiClient::new(
            Scripted::new(vec![transient(), transient(), transient()]),
            fast_policy(2),
        );
        let err = client.generate("p", &[]).await.unwrap_err();
        match err {
            PipelineError::PermanentApi { message, attempts } => {
                assert_eq!(attempts, 3);
                assert!(message.contains("429"), "got: {message}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn empty_reply_is_permanent() {
        let client = AiClient::new(Scripted::new(vec![Ok("  \n".into())]), fast_policy(2));
        assert!(client.generate("p", &[]).await.is_err());
        assert_eq!(client.calls(), 1);
    }
}
