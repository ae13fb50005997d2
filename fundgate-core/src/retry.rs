//! Bounded retry with a fixed backoff schedule.

use crate::error::FetchError;
use std::time::Duration;
use tracing::debug;

/// `backoff[i]` is the pause before attempt `i + 2`; attempts = `backoff.len() + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(backoff: Vec<Duration>) -> Self {
        Self { backoff }
    }

    /// 0.6s, 1.4s, 3.0s between four attempts.
    pub fn vendor_default() -> Self {
        Self::new(vec![
            Duration::from_millis(600),
            Duration::from_millis(1400),
            Duration::from_millis(3000),
        ])
    }

    /// Single attempt.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    /// `attempts` tries with no pause between them.
    pub fn immediate(attempts: usize) -> Self {
        Self::new(vec![Duration::ZERO; attempts.saturating_sub(1)])
    }

    pub fn max_attempts(&self) -> usize {
        self.backoff.len() + 1
    }

    pub fn backoff(&self) -> &[Duration] {
        &self.backoff
    }

    /// Run `op` until it succeeds, returns a non-transient error, or attempts run out.
    pub fn run<T>(&self, mut op: impl FnMut(usize) -> Result<T, FetchError>) -> Result<T, FetchError> {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.backoff.len() => {
                    let delay = self.backoff[attempt];
                    debug!(attempt = attempt + 1, ?delay, error = %e, "transient failure, retrying");
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::vendor_default()
    }
}
