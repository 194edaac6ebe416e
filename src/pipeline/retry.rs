//! Retry/backoff around oracle calls.
//!
//! Failures are split into rate-limited (HTTP 429 or provider throttling text)
//! and fatal. Rate-limited failures wait either for the provider's
//! "try again in Xs" hint or for `min(max_delay, base_delay * 2^attempt)`.
//! Pacing state lives in an explicit `RateLimiter` owned by the caller.

use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;

/// Lowercased substrings that mark an error as provider throttling.
const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "429", "tpm", "tokens per min"];

static WAIT_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)try again in\s+(\d+)(?:\.(\d+))?\s*s\b").expect("valid wait-hint regex")
});

// ═══════════════════════════════════════════════════════════
// Classification
// ═══════════════════════════════════════════════════════════

/// Errors that may carry a structured status code.
pub trait RateLimitSignal: Display {
    fn status_code(&self) -> Option<u16> {
        None
    }
}

pub fn is_rate_limited<E: RateLimitSignal + ?Sized>(err: &E) -> bool {
    if err.status_code() == Some(429) {
        return true;
    }
    let text = err.to_string().to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| text.contains(m))
}

/// Parse "try again in <seconds>s", rounded up to the millisecond.
pub fn parse_wait_hint(text: &str) -> Option<Duration> {
    let caps = WAIT_HINT.captures(text)?;
    let whole: u64 = caps.get(1)?.as_str().parse().ok()?;

    let mut millis = whole.checked_mul(1_000)?;
    if let Some(frac) = caps.get(2) {
        let digits = frac.as_str();
        let (head, tail) = digits.split_at(digits.len().min(3));
        let head_ms: u64 = format!("{head:0<3}").parse().ok()?;
        millis += head_ms;
        if tail.bytes().any(|b| b != b'0') {
            millis += 1;
        }
    }
    Some(Duration::from_millis(millis))
}

// ═══════════════════════════════════════════════════════════
// Policy + limiter
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Exponential backoff for the retry following failed attempt `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Provider hint verbatim when present, exponential backoff otherwise.
    pub fn delay_for(&self, error_text: &str, attempt: u32) -> Duration {
        parse_wait_hint(error_text).unwrap_or_else(|| self.backoff_delay(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }
}

/// Shared request pacing: a minimum spacing between calls, plus a blackout
/// window pushed forward whenever any caller gets throttled.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Wait for this caller's slot. Returns `false` if `cancel` fired first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.min_interval);
            slot
        };
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep_until(slot) => true,
        }
    }

    /// Hold every caller back for at least `wait` from now.
    pub async fn penalize(&self, wait: Duration) {
        let mut next = self.next_slot.lock().await;
        let until = Instant::now() + wait;
        *next = Some(next.map_or(until, |n| n.max(until)));
    }
}

// ═══════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum RetryError<E> {
    #[error("{0}")]
    Fatal(E),

    #[error("Still rate limited after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("Cancelled")]
    Cancelled,
}

impl<E> RetryError<E> {
    /// The underlying operation error, if there was one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Fatal(e) | RetryError::Exhausted { last: e, .. } => Some(e),
            RetryError::Cancelled => None,
        }
    }
}

/// Policy plus limiter; cheap to clone, clones share pacing state.
#[derive(Debug, Clone)]
pub struct RetryEngine {
    policy: RetryPolicy,
    limiter: RateLimiter,
}

impl RetryEngine {
    pub fn new(policy: RetryPolicy, limiter: RateLimiter) -> Self {
        Self { policy, limiter }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            RetryPolicy::from(config),
            RateLimiter::new(config.min_request_interval()),
        )
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Run `op` until it succeeds, fails fatally, runs out of retries or `cancel` fires.
    ///
    /// Cancellation is checked before every attempt and interrupts both pacing
    /// waits and backoff sleeps; an attempt already in flight is allowed to finish.
    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RateLimitSignal,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            if !self.limiter.acquire(cancel).await {
                return Err(RetryError::Cancelled);
            }

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !is_rate_limited(&err) {
                return Err(RetryError::Fatal(err));
            }
            if attempt >= self.policy.max_retries {
                tracing::warn!(
                    attempts = attempt + 1,
                    error = %err,
                    "Rate limit retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt + 1,
                    last: err,
                });
            }

            let delay = self.policy.delay_for(&err.to_string(), attempt);
            tracing::warn!(
                attempt = attempt + 1,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Rate limited, backing off"
            );
            self.limiter.penalize(delay).await;

            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
