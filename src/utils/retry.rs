// Retry with exponential backoff and jitter for transient failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::api::middleware::AppError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Randomize each delay to avoid thundering herds.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before the retry following `attempt` (1-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as f64;
        let mut delay =
            self.initial_delay.as_secs_f64() * self.exponential_base.powf(exponent);
        delay = delay.min(self.max_delay.as_secs_f64());
        if self.jitter {
            delay *= 0.5 + rand::rng().random::<f64>();
        }
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Run `op`, retrying failures that satisfy `is_retryable` until the attempt
/// budget is spent. The final error is returned unchanged.
pub async fn retry_async<T, F, Fut, P>(
    config: &RetryConfig,
    is_retryable: P,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
    P: Fn(&AppError) -> bool,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_attempts && is_retryable(&err) => {
                let delay = config.calculate_delay(attempt);
                tracing::info!(
                    "retry {}/{} after {:?}: {}",
                    attempt,
                    config.max_attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if attempt > 1 {
                    tracing::warn!("retries exhausted after {} attempts: {}", attempt, err);
                }
                return Err(err);
            }
        }
    }
}
