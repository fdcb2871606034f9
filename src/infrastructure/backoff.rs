use std::future::Future;
use std::time::Duration;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            max_attempts: 6,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `op` until it succeeds or the attempt budget is spent, returning
    /// the last error in that case.
    pub async fn retry<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.delay(attempt);
                    tracing::warn!(
                        what,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff whose attempts fit roughly inside `budget`.
    pub fn within(budget: Duration) -> Self {
        let base = Self::default();
        let mut spent = Duration::ZERO;
        let mut attempts = 1;
        while attempts < 32 {
            let next = base.delay(attempts);
            if spent + next > budget {
                break;
            }
            spent += next;
            attempts += 1;
        }
        Self {
            max_attempts: attempts,
            ..base
        }
    }
}
