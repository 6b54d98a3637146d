use crate::error::{CapabilityError, CapabilityResult};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounded exponential backoff for capability calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt ceiling is reached.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> CapabilityResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CapabilityResult<T>>,
    {
        let mut last_error: Option<CapabilityError> = None;

        for attempt in 0..self.max_attempts.max(1) {
            if attempt > 0 {
                let delay = self.delay_for(attempt);
                debug!("Retry {} for {} after {:?}", attempt, label, delay);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("{}: attempt {} failed: {}", label, attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CapabilityError::Unavailable("no attempt made".to_string())))
    }
}
