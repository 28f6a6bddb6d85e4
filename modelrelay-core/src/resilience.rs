//! Resilience envelope: retry with exponential backoff plus jitter, and
//! the capability-keyed timeout policy.
//!
//! Two nested policies wrap every outbound call. The outer timeout
//! enforces a per-call deadline; video generation and realtime connects
//! bypass it because those operations legitimately run for minutes;
//! that is a per-client policy keyed on capability, never on path
//! inspection.
//! The inner retry loop re-attempts only the classified-retryable kinds
//! and reports every failed retryable attempt to the error tracker.
//!
//! The delay schedule is `initial · 2^(attempt-1)` plus uniform jitter
//! of up to 20% of the delay, clamped to `max_delay`. An upstream
//! `Retry-After` hint overrides the computed delay for that attempt.

use crate::config::GatewayConfig;
use crate::error::{ErrorKind, ProviderError};
use crate::models::RequestKind;
use crate::ports::{ErrorRecord, ErrorTracker};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Immutable identity of the call being retried, used to tag error
/// records.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext {
    pub key_id: i64,
    pub provider_id: i64,
    pub correlation_id: Uuid,
}

impl RetryContext {
    pub fn new(key_id: i64, provider_id: i64) -> Self {
        Self {
            key_id,
            provider_id,
            correlation_id: Uuid::new_v4(),
        }
    }
}

/// Stateless retry policy; cheap to clone and safe to share.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the uniform jitter, as a fraction of the delay
    pub jitter_factor: f64,
    pub log_retries: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            log_retries: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: config.initial_delay(),
            max_delay: config.max_delay(),
            jitter_factor: 0.2,
            log_retries: config.enable_retry_logging,
        }
    }

    /// Delay before retry number `attempt` (1-based), honoring an
    /// upstream hint when present.
    fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max_delay);
        }
        let base = self
            .initial_delay
            .mul_f64(2f64.powi(attempt.saturating_sub(1) as i32))
            .min(self.max_delay);
        if self.jitter_factor <= 0.0 {
            return base;
        }
        let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..self.jitter_factor));
        (base + jitter).min(self.max_delay)
    }

    /// Run `operation` under this policy.
    ///
    /// Retryable failures are re-attempted up to `max_retries` times and
    /// each one produces an error-tracker record carrying the attempt
    /// index. Protocol errors get exactly one extra attempt regardless
    /// of kind. The last classified error surfaces unchanged.
    pub async fn execute<F, Fut, T>(
        &self,
        ctx: RetryContext,
        tracker: &Arc<dyn ErrorTracker>,
        mut operation: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt: u32 = 0;
        let mut protocol_retried = false;

        loop {
            attempt += 1;
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    let kind = error.kind();
                    if kind.is_tracked() {
                        tracker.record(ErrorRecord {
                            key_id: ctx.key_id,
                            provider_id: ctx.provider_id,
                            kind,
                            http_status: Some(error.status_code()),
                            attempt,
                            correlation_id: ctx.correlation_id,
                        });
                    }

                    let retry_protocol = kind == ErrorKind::Protocol && !protocol_retried;
                    if retry_protocol {
                        protocol_retried = true;
                    } else if !kind.is_retryable() || attempt > self.max_retries {
                        return Err(error);
                    }

                    let delay = self.delay_for(attempt, error.retry_after());
                    if self.log_retries {
                        tracing::warn!(
                            attempt,
                            kind = ?kind,
                            delay_ms = delay.as_millis() as u64,
                            correlation_id = %ctx.correlation_id,
                            "retrying provider call"
                        );
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Outer deadline policy. `None` deadlines mean unlimited.
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    default_deadline: Option<Duration>,
    log_timeouts: bool,
}

impl TimeoutPolicy {
    pub fn new(default_deadline: Option<Duration>, log_timeouts: bool) -> Self {
        Self {
            default_deadline,
            log_timeouts,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(Some(config.default_timeout()), config.enable_timeout_logging)
    }

    /// Effective deadline for a request kind; long-running kinds bypass
    /// the deadline entirely.
    pub fn deadline_for(&self, kind: RequestKind) -> Option<Duration> {
        if kind.bypasses_timeout() {
            None
        } else {
            self.default_deadline
        }
    }

    /// Run `operation` under the deadline for `kind`.
    pub async fn run<Fut, T>(&self, kind: RequestKind, operation: Fut) -> Result<T, ProviderError>
    where
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        match self.deadline_for(kind) {
            None => operation.await,
            Some(deadline) => match tokio::time::timeout(deadline, operation).await {
                Ok(result) => result,
                Err(_) => {
                    if self.log_timeouts {
                        tracing::warn!(
                            kind = ?kind,
                            deadline_ms = deadline.as_millis() as u64,
                            "provider call exceeded deadline"
                        );
                    }
                    Err(ProviderError::Timeout)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::RecordingErrorTracker;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn tracker() -> (Arc<RecordingErrorTracker>, Arc<dyn ErrorTracker>) {
        let recording = Arc::new(RecordingErrorTracker::new());
        let as_dyn: Arc<dyn ErrorTracker> = recording.clone();
        (recording, as_dyn)
    }

    fn rate_limited() -> ProviderError {
        ProviderError::RateLimit {
            retry_after: None,
            detail: Default::default(),
        }
    }

    /// Statuses 429 then 503 then success: two retries, delays within
    /// the jittered schedule, two tracked records in kind order.
    #[tokio::test(start_paused = true)]
    async fn retry_schedule_and_tracking() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
            log_retries: false,
        };
        let (recording, as_dyn) = tracker();
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result = policy
            .execute(RetryContext::new(7, 3), &as_dyn, || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    match n {
                        0 => Err(rate_limited()),
                        1 => Err(ProviderError::ServiceUnavailable { reason: None }),
                        _ => Ok("ok"),
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        // Delays: [1, 1.2] then [2, 2.4] seconds.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_millis(3600), "elapsed {elapsed:?}");

        let records = recording.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, ErrorKind::RateLimit);
        assert_eq!(records[0].attempt, 1);
        assert_eq!(records[1].kind, ErrorKind::ServiceUnavailable);
        assert_eq!(records[1].attempt, 2);
        assert_eq!(records[0].correlation_id, records[1].correlation_id);
        assert_eq!(records[0].key_id, 7);
        assert_eq!(records[0].provider_id, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_overrides_schedule() {
        let policy = RetryPolicy {
            log_retries: false,
            ..Default::default()
        };
        let (_, as_dyn) = tracker();
        let attempts = AtomicU32::new(0);
        let started = Instant::now();

        let result = policy
            .execute(RetryContext::new(1, 1), &as_dyn, || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ProviderError::RateLimit {
                            retry_after: Some(Duration::from_secs(5)),
                            detail: Default::default(),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_millis(5200));
    }

    #[tokio::test]
    async fn non_retryable_fails_fast() {
        let policy = RetryPolicy {
            log_retries: false,
            ..Default::default()
        };
        let (recording, as_dyn) = tracker();
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute(RetryContext::new(1, 1), &as_dyn, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::InvalidApiKey) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidApiKey);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        // Non-retryable kinds are still tracked once.
        assert_eq!(recording.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_last_error() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter_factor: 0.2,
            log_retries: false,
        };
        let (recording, as_dyn) = tracker();

        let result: Result<(), _> = policy
            .execute(RetryContext::new(1, 1), &as_dyn, || async {
                Err(ProviderError::ServiceUnavailable {
                    reason: Some("down".into()),
                })
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::ServiceUnavailable);
        // Initial attempt plus two retries, each tracked.
        assert_eq!(recording.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn protocol_error_retries_exactly_once() {
        let policy = RetryPolicy {
            log_retries: false,
            ..Default::default()
        };
        let (_, as_dyn) = tracker();
        let attempts = AtomicU32::new(0);

        let result: Result<(), _> = policy
            .execute(RetryContext::new(1, 1), &as_dyn, || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ProviderError::Protocol {
                        message: "garbled".into(),
                    })
                }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Protocol);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_policy_enforces_deadline() {
        let policy = TimeoutPolicy::new(Some(Duration::from_secs(1)), false);
        let result: Result<(), _> = policy
            .run(RequestKind::Chat, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn video_and_realtime_bypass_deadline() {
        let policy = TimeoutPolicy::new(Some(Duration::from_secs(1)), false);
        assert_eq!(policy.deadline_for(RequestKind::Video), None);
        assert_eq!(policy.deadline_for(RequestKind::RealtimeConnect), None);
        assert_eq!(
            policy.deadline_for(RequestKind::Chat),
            Some(Duration::from_secs(1))
        );

        let result = policy
            .run(RequestKind::Video, async {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Ok("rendered")
            })
            .await;
        assert_eq!(result.unwrap(), "rendered");
    }
}
