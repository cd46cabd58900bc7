//! Rate-limited LLM service
//!
//! Fronts the provider client with a token rolling-window rate limit and
//! the retry policy. Retryable provider errors (rate limit, transient 5xx,
//! timeout) are retried with exponential backoff and jitter up to the
//! per-call budget; exhausting the budget yields `None` to the caller.
//! Terminal errors (bad request, auth) propagate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use super::client::{CallKwargs, ChatMessage, LlmClient};
use super::error::LlmError;
use crate::services::base::{Service, ServiceError};
use crate::services::usage::{SharedUsage, TimeBoundedUsageTracker, UsageCategory};

/// Flat character-per-token estimate used before the provider reports the
/// actual counts
const CHARS_PER_TOKEN: f64 = 4.0;

/// Retry policy for retryable provider errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given zero-based attempt, with jitter
    fn delay_for(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let base = suggested.unwrap_or(exp).min(self.max_delay);
        let jitter = rand::rng().random_range(0.8..1.2);
        base.mul_f64(jitter)
    }
}

/// One queued LLM call
#[derive(Debug)]
pub struct LlmRequest {
    pub messages: Vec<ChatMessage>,
    pub category: UsageCategory,
    pub usage: Option<SharedUsage>,
    pub kwargs: CallKwargs,
}

/// The rate-limited LLM service.
pub struct LlmService {
    client: Arc<dyn LlmClient>,
    rate_limit: f64,
    window: Mutex<TimeBoundedUsageTracker>,
    retry: RetryPolicy,
}

impl LlmService {
    /// `rate_limit` is the token budget per rolling window (typically one
    /// minute).
    pub fn new(client: Arc<dyn LlmClient>, rate_limit: f64, window: Duration) -> Self {
        Self {
            client,
            rate_limit,
            window: Mutex::new(TimeBoundedUsageTracker::new(window)),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn record_cost(&self, tokens: f64) {
        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .add(tokens);
    }

    fn estimate_tokens(messages: &[ChatMessage]) -> f64 {
        let chars: usize = messages.iter().map(|m| m.content.len()).sum();
        chars as f64 / CHARS_PER_TOKEN
    }
}

#[async_trait]
impl Service for LlmService {
    const NAME: &'static str = "LlmService";
    type Request = LlmRequest;
    type Response = Option<String>;

    fn can_process(&self) -> bool {
        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .total()
            < self.rate_limit
    }

    async fn process(&self, request: Self::Request) -> Result<Self::Response, ServiceError> {
        let estimate = Self::estimate_tokens(&request.messages);
        self.record_cost(estimate);

        for attempt in 0..self.retry.max_attempts {
            match self
                .client
                .chat_completion(&request.messages, &request.kwargs)
                .await
            {
                Ok(completion) => {
                    // replace the estimate with the provider-reported count
                    let usage = &completion.usage_meta["usage"];
                    let actual = usage["prompt_tokens"].as_u64().unwrap_or(0)
                        + usage["completion_tokens"].as_u64().unwrap_or(0);
                    if actual > 0 {
                        self.record_cost(actual as f64 - estimate);
                    }
                    if let Some(tracker) = &request.usage {
                        tracker
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .update_from_response(
                                self.client.model(),
                                request.category,
                                &completion.usage_meta,
                            );
                    }
                    return Ok(Some(completion.text));
                }
                Err(err) if err.is_retryable() => {
                    let delay = self.retry.delay_for(attempt, err.retry_after());
                    debug!(
                        attempt,
                        %err,
                        ?delay,
                        "retryable LLM error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(%err, "terminal LLM error");
                    return Err(ServiceError::Llm(err));
                }
            }
        }

        warn!(
            attempts = self.retry.max_attempts,
            "LLM retry budget exhausted; returning no response"
        );
        Ok(None)
    }
}

/// Convenience: is this service error a terminal provider error?
pub fn is_terminal_llm_error(err: &ServiceError) -> bool {
    matches!(err, ServiceError::Llm(inner) if !inner.is_retryable())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::Completion;
    use crate::services::usage::{UsageTracker, usage_from_response};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Client scripted to fail a fixed number of times before succeeding
    struct FlakyClient {
        failures: usize,
        calls: AtomicUsize,
        error: fn() -> LlmError,
    }

    #[async_trait]
    impl LlmClient for FlakyClient {
        fn model(&self) -> &str {
            "gpt-4o"
        }

        async fn chat_completion(
            &self,
            _messages: &[ChatMessage],
            _kwargs: &CallKwargs,
        ) -> Result<Completion, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err((self.error)());
            }
            Ok(Completion {
                text: "{\"answer\": true}".to_string(),
                usage_meta: json!({
                    "usage": {"prompt_tokens": 10, "completion_tokens": 5}
                }),
            })
        }
    }

    fn request(usage: Option<SharedUsage>) -> LlmRequest {
        LlmRequest {
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
            category: UsageCategory::Default,
            usage,
            kwargs: CallKwargs::default(),
        }
    }

    #[tokio::test]
    async fn test_retries_then_succeeds_with_single_usage_record() {
        let service = LlmService::new(
            Arc::new(FlakyClient {
                failures: 3,
                calls: AtomicUsize::new(0),
                error: || LlmError::RateLimited { retry_after: None },
            }),
            1e6,
            Duration::from_secs(60),
        )
        .with_retry(RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        });

        let tracker = UsageTracker::shared("test", usage_from_response);
        let start = std::time::Instant::now();
        let out = service
            .process(request(Some(Arc::clone(&tracker))))
            .await
            .expect("process");
        assert_eq!(out.as_deref(), Some("{\"answer\": true}"));

        // three failures at >= 10ms, 20ms, 40ms backoff (with 0.8 jitter floor)
        assert!(start.elapsed() >= Duration::from_millis(3 * 8));

        let tracker = tracker.lock().expect("lock");
        let totals = tracker.totals();
        let counts = totals.get("gpt-4o").expect("model");
        assert_eq!(counts.requests, 1);
        assert_eq!(counts.prompt_tokens, 10);
        assert_eq!(counts.response_tokens, 5);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_none() {
        let service = LlmService::new(
            Arc::new(FlakyClient {
                failures: usize::MAX,
                calls: AtomicUsize::new(0),
                error: || LlmError::Transient {
                    status: 503,
                    message: "unavailable".to_string(),
                },
            }),
            1e6,
            Duration::from_secs(60),
        )
        .with_retry(RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        });

        let out = service.process(request(None)).await.expect("process");
        assert_eq!(out, None);
    }

    #[tokio::test]
    async fn test_terminal_error_propagates() {
        let service = LlmService::new(
            Arc::new(FlakyClient {
                failures: usize::MAX,
                calls: AtomicUsize::new(0),
                error: || LlmError::BadRequest("malformed".to_string()),
            }),
            1e6,
            Duration::from_secs(60),
        );

        let err = service.process(request(None)).await.unwrap_err();
        assert!(is_terminal_llm_error(&err));
    }

    #[tokio::test]
    async fn test_rate_window_blocks_can_process() {
        let service = LlmService::new(
            Arc::new(FlakyClient {
                failures: 0,
                calls: AtomicUsize::new(0),
                error: || LlmError::RateLimited { retry_after: None },
            }),
            10.0,
            Duration::from_secs(60),
        );
        assert!(service.can_process());
        service.record_cost(100.0);
        assert!(!service.can_process());
    }
}
