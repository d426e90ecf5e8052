use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Retry configuration for REST calls against exchange APIs
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponential =
        config.base_delay.as_millis() as f64 * config.multiplier.powi(attempt as i32 - 1);
    let delay_ms = exponential.min(config.max_delay.as_millis() as f64) as u64;

    // ±25% jitter
    let jitter_range = delay_ms / 4;
    let jitter = if jitter_range > 0 {
        (rand::random::<u64>() % (2 * jitter_range)) as i64 - jitter_range as i64
    } else {
        0
    };
    Duration::from_millis((delay_ms as i64 + jitter).max(0) as u64)
}

/// Retry a future with exponential backoff
pub async fn retry_with_backoff<F, Fut, T, E>(mut f: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempts >= config.max_attempts {
                    debug!("Giving up after {} attempts", attempts);
                    return Err(e);
                }
                let delay = calculate_delay(attempts, config);
                debug!("Attempt {} failed ({}), backing off {:?}", attempts, e, delay);
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_with_attempts() {
        let config = RetryConfig::default();
        let delay1 = calculate_delay(1, &config);
        assert!(delay1.as_millis() >= 75 && delay1.as_millis() <= 125);
        let delay2 = calculate_delay(2, &config);
        assert!(delay2.as_millis() >= 150 && delay2.as_millis() <= 250);
    }

    #[tokio::test]
    async fn succeeds_after_failures() {
        let mut calls = 0;
        let result = retry_with_backoff(
            || {
                calls += 1;
                async move {
                    if calls < 3 {
                        Err("not yet")
                    } else {
                        Ok("done")
                    }
                }
            },
            &RetryConfig {
                max_attempts: 5,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
            },
        )
        .await;
        assert_eq!(result, Ok("done"));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: Result<(), &str> = retry_with_backoff(
            || {
                calls += 1;
                async move { Err("always") }
            },
            &RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
            },
        )
        .await;
        assert_eq!(result, Err("always"));
        assert_eq!(calls, 3);
    }
}
