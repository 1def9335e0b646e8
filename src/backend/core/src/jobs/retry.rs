//! Retry policies and the retry capability consulted on handler failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::job::JobError;
use super::run::JobRun;
use crate::clock::deadline_after;

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// Linear increase in delay (initial + increment * retry)
    Linear {
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,
        #[serde(with = "humantime_serde")]
        increment: Duration,
    },
    /// Exponential increase in delay (initial * multiplier^retry)
    Exponential {
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,
        #[serde(with = "humantime_serde")]
        max_delay: Duration,
        multiplier: f64,
    },
    /// Exponential with random jitter
    ExponentialWithJitter {
        #[serde(with = "humantime_serde")]
        initial_delay: Duration,
        #[serde(with = "humantime_serde")]
        max_delay: Duration,
        multiplier: f64,
        jitter_factor: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay before retry number `retry` (0-indexed).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let secs = match self {
            Self::Fixed { delay } => delay.as_secs_f64(),
            Self::Linear {
                initial_delay,
                increment,
            } => initial_delay.as_secs_f64() + increment.as_secs_f64() * retry as f64,
            Self::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let delay = initial_delay.as_secs_f64() * multiplier.powi(retry as i32);
                delay.min(max_delay.as_secs_f64())
            }
            Self::ExponentialWithJitter {
                initial_delay,
                max_delay,
                multiplier,
                jitter_factor,
            } => {
                let base = initial_delay.as_secs_f64() * multiplier.powi(retry as i32);
                let capped = base.min(max_delay.as_secs_f64());
                let jitter = (fastrand::f64() * 2.0 - 1.0) * capped * jitter_factor;
                (capped + jitter).max(0.0)
            }
        };

        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Create a fixed backoff strategy.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Retry immediately.
    pub fn immediate() -> Self {
        Self::Fixed {
            delay: Duration::ZERO,
        }
    }

    /// Create an exponential backoff with jitter.
    pub fn exponential_with_jitter() -> Self {
        Self::ExponentialWithJitter {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for job retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first (values below 1 mean 1)
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
    /// Whether to retry errors marked non-retryable
    pub retry_on_any_error: bool,
    /// Stop retrying once this much time has passed since the first attempt
    #[serde(with = "humantime_serde")]
    pub max_retry_duration: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
            retry_on_any_error: false,
            max_retry_duration: None,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// A policy allowing `max_attempts` attempts in total.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Replace the backoff strategy.
    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check if another attempt should follow failed attempt number `attempt`
    /// (1-indexed).
    pub fn should_retry(
        &self,
        attempt: u32,
        error: &JobError,
        first_attempt_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> bool {
        if attempt >= self.max_attempts.max(1) {
            return false;
        }

        if !self.retry_on_any_error && !error.retryable {
            return false;
        }

        if let Some(max_duration) = self.max_retry_duration {
            let elapsed = (now - first_attempt_at).to_std().unwrap_or(Duration::ZERO);
            if elapsed >= max_duration {
                return false;
            }
        }

        true
    }

    /// Delay before the attempt following failed attempt `attempt` (1-indexed).
    pub fn next_retry_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay_for_attempt(attempt.saturating_sub(1))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Handler
// ═══════════════════════════════════════════════════════════════════════════════

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run another attempt at the given instant.
    RetryAt(DateTime<Utc>),
    /// Stop; the run fails permanently.
    GiveUp,
}

/// Decides whether and when a failed attempt is retried.
pub trait RetryHandler: Send + Sync + 'static {
    fn on_failure(&self, run: &JobRun, error: &JobError, now: DateTime<Utc>) -> RetryDecision;
}

/// Applies the run's own policy, falling back to an engine-wide default.
#[derive(Debug, Clone, Default)]
pub struct DefaultRetryHandler {
    default_policy: RetryPolicy,
}

impl DefaultRetryHandler {
    pub fn new(default_policy: RetryPolicy) -> Self {
        Self { default_policy }
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default_policy
    }
}

impl RetryHandler for DefaultRetryHandler {
    fn on_failure(&self, run: &JobRun, error: &JobError, now: DateTime<Utc>) -> RetryDecision {
        let policy = run.retry_policy.as_ref().unwrap_or(&self.default_policy);
        if policy.should_retry(run.attempt, error, run.first_attempt_at(), now) {
            RetryDecision::RetryAt(deadline_after(now, policy.next_retry_delay(run.attempt)))
        } else {
            RetryDecision::GiveUp
        }
    }
}
