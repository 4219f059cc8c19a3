//! Sliding-window throttle for outbound provider calls.
//!
//! One limiter instance is shared by the single-ticker pipeline, the
//! batch runner, and the watchman, so the aggregate call rate to the
//! vendor stays bounded no matter which path is driving requests.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::config::RateLimitConfig;
use crate::provider::ProviderError;

pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    acquire_timeout: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_calls: config.max_calls,
            window: Duration::from_millis(config.window_ms),
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait for a call slot. Callers queue rather than drop; only the
    /// configured acquire timeout turns waiting into an error.
    pub async fn acquire(&self) -> Result<(), ProviderError> {
        tokio::time::timeout(self.acquire_timeout, self.acquire_inner())
            .await
            .map_err(|_| {
                warn!(
                    timeout_secs = self.acquire_timeout.as_secs(),
                    "gave up waiting for a rate limiter slot"
                );
                ProviderError::RateLimitTimeout
            })
    }

    async fn acquire_inner(&self) {
        loop {
            let wait = {
                let mut stamps = self.timestamps.lock().await;
                let now = Instant::now();
                while let Some(front) = stamps.front() {
                    if now.duration_since(*front) >= self.window {
                        stamps.pop_front();
                    } else {
                        break;
                    }
                }
                if stamps.len() < self.max_calls {
                    stamps.push_back(now);
                    return;
                }
                // oldest call ages out of the window after this long
                self.window - now.duration_since(*stamps.front().unwrap_or(&now))
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_calls: usize, window_ms: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            max_calls,
            window_ms,
            acquire_timeout_secs: 30,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_within_budget_do_not_wait() {
        let limiter = limiter(3, 1000);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excess_call_queues_until_window_rolls() {
        let limiter = limiter(2, 1000);
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();

        let start = Instant::now();
        limiter.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_instead_of_waiting_forever() {
        let limiter = RateLimiter::new(&RateLimitConfig {
            max_calls: 1,
            window_ms: 60_000,
            acquire_timeout_secs: 1,
        });
        limiter.acquire().await.unwrap();
        let err = limiter.acquire().await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimitTimeout));
    }
}
