use std::time::Duration;

/// Bounded retry with a fixed backoff between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    /// Delay to wait after a failed `attempt` (1-based), or `None` once exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts.max(1) {
            None
        } else {
            Some(self.backoff)
        }
    }
}
