//! Retry bookkeeping for outbound calls.
//!
//! [`RetryState`] tracks the attempt index and the last failure, and decides
//! after each failure whether to back off or give up. Sleeping goes through
//! the [`Sleeper`] trait so backoff can be observed without waiting.

use async_trait::async_trait;
use serde_json::{Map, json};
use std::time::Duration;

use crate::errors::{ClassifiedError, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Never less than 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff after the failure of 0-based attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// What to do after a retryable failure.
#[derive(Debug)]
pub enum NextStep {
    /// Sleep for `delay`, then make attempt `attempt` (0-based).
    Retry { attempt: u32, delay: Duration },
    /// Every attempt failed.
    Exhausted(ClassifiedError),
}

#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
    last_error: Option<String>,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            last_error: None,
        }
    }

    /// 0-based index of the attempt in progress.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Record a retryable failure of the current attempt.
    pub fn record_failure(&mut self, reason: impl Into<String>) -> NextStep {
        let failed = self.attempt;
        self.last_error = Some(reason.into());

        if failed + 1 >= self.policy.max_attempts {
            let mut context = Map::new();
            context.insert("attempts".to_string(), json!(failed + 1));
            context.insert("last_error".to_string(), json!(self.last_error));
            return NextStep::Exhausted(ClassifiedError::with_context(ErrorKind::ApiFailure, "Max retries exceeded", context));
        }

        self.attempt += 1;
        NextStep::Retry {
            attempt: self.attempt,
            delay: self.policy.delay_for(failed),
        }
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested delays and returns immediately.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSleeper {
    delays: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(test)]
impl RecordingSleeper {
    pub(crate) fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}
