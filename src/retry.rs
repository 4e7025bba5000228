// src/retry.rs
//! Bounded exponential backoff shared by the audio fetch and channel submissions.

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one (minimum 1).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn with_initial_delay(mut self, d: Duration) -> Self {
        self.initial_delay = d;
        self
    }

    /// Delay before retry number `retry` (1-based); 0 means the first attempt.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(retry as i32 - 1);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }
}

/// Upper bound on a server-requested wait; `max_delay` only caps our own backoff.
pub const MAX_SERVER_WAIT: Duration = Duration::from_secs(300);

/// Errors that can tell whether another attempt might succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;

    /// Server-requested wait, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < attempts => {
                let mut wait = policy.delay_for_attempt(attempt);
                if let Some(ra) = e.retry_after() {
                    wait = wait.max(ra.min(MAX_SERVER_WAIT));
                }
                tracing::debug!(
                    target: "retry",
                    what,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    error = %e,
                    "transient failure, backing off"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
