// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry logic with exponential backoff for reconciliation activities.
//!
//! Transient failures ([`DnsError::is_transient`]) are retried with
//! exponential backoff; permanent failures such as malformed change records
//! fail immediately.

use crate::dns_errors::DnsError;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Initial retry interval (500ms)
const INITIAL_INTERVAL_MILLIS: u64 = 500;

/// Maximum interval between retries (30 seconds)
const MAX_INTERVAL_SECS: u64 = 30;

/// Attempts per activity, including the first one
const MAX_ATTEMPTS: u32 = 5;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Initial interval duration
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Maximum total elapsed time
    pub max_elapsed_time: Option<Duration>,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
    /// Start time for tracking total elapsed time
    start_time: Instant,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier,
            randomization_factor,
            start_time: Instant::now(),
        }
    }

    /// Get the next backoff interval, or None if max elapsed time exceeded.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let mut rng = rand::thread_rng();
        let jittered = rng.gen_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// How an activity is retried.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Attempts including the first one
    pub max_attempts: u32,
    pub multiplier: f64,
    pub randomization_factor: f64,
}

impl Default for RetryPolicy {
    /// Default policy for node-local activities.
    ///
    /// # Retry Schedule
    ///
    /// With these settings, retries occur at approximately:
    ///
    /// 1. 500ms
    /// 2. 1s
    /// 3. 2s
    /// 4. 4s
    ///
    /// after which the last error is surfaced.
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(INITIAL_INTERVAL_MILLIS),
            max_interval: Duration::from_secs(MAX_INTERVAL_SECS),
            max_attempts: MAX_ATTEMPTS,
            multiplier: BACKOFF_MULTIPLIER,
            randomization_factor: RANDOMIZATION_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.initial_interval,
            self.max_interval,
            None,
            self.multiplier,
            self.randomization_factor,
        )
    }
}

/// Run an activity, retrying transient failures with exponential backoff.
///
/// # Arguments
///
/// * `policy` - Retry budget and backoff shape
/// * `operation_name` - Human-readable name for logging (e.g., "full reload on node1")
/// * `operation` - Async function performing one attempt
///
/// # Errors
///
/// Returns the first permanent error, or the last transient error once the
/// attempt budget is spent.
///
/// # Example
///
/// ```no_run
/// use dnssync::dns_errors::DnsError;
/// use dnssync::reconcilers::retry::{retry_activity, RetryPolicy};
///
/// # async fn example() -> Result<(), DnsError> {
/// let serial = retry_activity(&RetryPolicy::default(), "read serial", || async {
///     Ok::<_, DnsError>(42_u64)
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_activity<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, DnsError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DnsError>>,
{
    let mut backoff = policy.backoff();
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Activity succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                if !e.is_transient() {
                    error!(
                        operation = operation_name,
                        reason = e.status_reason(),
                        error = %e,
                        "Non-retryable activity error, failing immediately"
                    );
                    return Err(e);
                }

                if attempt >= policy.max_attempts {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        error = %e,
                        "Retry budget exhausted, giving up"
                    );
                    return Err(e);
                }

                if let Some(duration) = backoff.next_backoff() {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        retry_after = ?duration,
                        error = %e,
                        "Retryable activity error, will retry"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
