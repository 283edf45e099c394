//! Retry policy and backoff computation.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use reqwest::{header::HeaderMap, StatusCode};

/// Randomization applied to the exponential backoff delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Jitter {
    /// Use the computed delay as-is.
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay / 2, delay]`.
    Equal,
}

impl Jitter {
    fn apply(self, delay: Duration) -> Duration {
        let millis = delay.as_millis() as u64;
        if millis == 0 {
            return delay;
        }
        let mut rng = rand::thread_rng();
        match self {
            Self::None => delay,
            Self::Full => Duration::from_millis(rng.gen_range(0..=millis)),
            Self::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + rng.gen_range(0..=millis - half))
            }
        }
    }
}

/// Retry configuration shared read-only by every call of a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one. Values below 1
    /// are treated as 1.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Cap on the computed backoff delay.
    pub max_delay: Duration,
    pub jitter: Jitter,
    /// Statuses that are retried until attempts run out.
    ///
    /// The final error is still classified by status class, so a 4xx added
    /// here (e.g. 408) ends as [`ErrorKind::ClientError`](crate::ErrorKind::ClientError).
    pub retryable_statuses: Vec<u16>,
    /// Whether connection failures and timeouts are retried.
    pub retry_transport_errors: bool,
    /// Cap on a server-supplied wait (`Retry-After`, `RateLimit-Reset`).
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            jitter: Jitter::Equal,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            retry_transport_errors: true,
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn never() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Exponential policy with `max_attempts` total attempts.
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: base_delay.saturating_mul(16),
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.retryable_statuses = statuses;
        self
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_statuses.contains(&status.as_u16())
    }

    /// Policy delay before retry number `retry` (1-based), jitter included.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        self.jitter.apply(delay)
    }

    /// Delay before the next attempt: a server-supplied wait wins over the
    /// policy's own backoff.
    pub(crate) fn delay_for(&self, retry: u32, headers: Option<&HeaderMap>) -> Duration {
        headers
            .and_then(server_delay)
            .map(|delay| delay.min(self.max_retry_after))
            .unwrap_or_else(|| self.backoff(retry))
    }
}

/// Reads `Retry-After` (delta seconds), falling back to GitLab's
/// `RateLimit-Reset` (unix epoch seconds).
pub(crate) fn server_delay(headers: &HeaderMap) -> Option<Duration> {
    if let Some(seconds) = header_u64(headers, "retry-after") {
        return Some(Duration::from_secs(seconds));
    }

    let reset = header_u64(headers, "ratelimit-reset")?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
    Some(Duration::from_secs(reset.saturating_sub(now)))
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
