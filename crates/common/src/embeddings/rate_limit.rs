//! Sliding-window admission control for provider calls
//!
//! The free tier allows only a handful of requests per minute, so every
//! provider call passes through `wait_if_needed` first. The window holds one
//! timestamp per granted admission; when full, the caller sleeps until the
//! oldest admission leaves the window, plus a one-second safety buffer, then
//! re-checks.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// Sliding-window rate limiter for outbound provider calls
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    admissions: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            admissions: Mutex::new(VecDeque::new()),
        }
    }

    /// Block until an admission is available, then record it.
    ///
    /// Safe under concurrent admission; the window mutation is exclusive.
    pub async fn wait_if_needed(&self) {
        loop {
            let wait = {
                let mut admissions = self.admissions.lock().await;
                let now = Instant::now();

                // Drop timestamps that have left the window
                while let Some(front) = admissions.front() {
                    if now.duration_since(*front) >= self.window {
                        admissions.pop_front();
                    } else {
                        break;
                    }
                }

                if admissions.len() < self.max_requests {
                    admissions.push_back(now);
                    return;
                }

                let oldest = *admissions.front().expect("window is non-empty");
                self.window
                    .saturating_sub(now.duration_since(oldest))
                    .saturating_add(Duration::from_secs(1))
            };

            warn!(wait_secs = wait.as_secs_f64(), "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of admissions currently inside the window
    pub async fn in_flight(&self) -> usize {
        let mut admissions = self.admissions.lock().await;
        let now = Instant::now();
        while let Some(front) = admissions.front() {
            if now.duration_since(*front) >= self.window {
                admissions.pop_front();
            } else {
                break;
            }
        }
        admissions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_admissions_below_limit_are_immediate() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let start = Instant::now();
        limiter.wait_if_needed().await;
        limiter.wait_if_needed().await;
        limiter.wait_if_needed().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_flight().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_admission_waits_out_the_window() {
        // max=2, W=60: three rapid admissions, the third returns no earlier
        // than 60s after the first
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        limiter.wait_if_needed().await;
        limiter.wait_if_needed().await;
        limiter.wait_if_needed().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_drains_over_time() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.wait_if_needed().await;
        limiter.wait_if_needed().await;
        assert_eq!(limiter.in_flight().await, 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.in_flight().await, 0);

        let start = Instant::now();
        limiter.wait_if_needed().await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
