use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limiter shared by every call made through one client.
///
/// The window holds the admission instants of the trailing minute. The
/// check, the wait and the record happen under one lock, so concurrent
/// callers are admitted one at a time and the ceiling is never exceeded.
pub struct RateLimiter {
    enabled: bool,
    ceiling: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
    hits: AtomicU64,
}

impl RateLimiter {
    pub fn new(ceiling: usize, enabled: bool) -> Self {
        Self::with_window(ceiling, WINDOW, enabled)
    }

    pub fn with_window(ceiling: usize, window: Duration, enabled: bool) -> Self {
        Self {
            enabled,
            ceiling: ceiling.max(1),
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(ceiling.max(1))),
            hits: AtomicU64::new(0),
        }
    }

    /// Waits until a request fits in the window, then records it.
    pub async fn admit(&self) {
        if !self.enabled {
            return;
        }

        let mut timestamps = self.timestamps.lock().await;
        self.prune(&mut timestamps, Instant::now());

        if timestamps.len() >= self.ceiling {
            if let Some(&oldest) = timestamps.front() {
                let wait = self.window.saturating_sub(Instant::now() - oldest);
                if !wait.is_zero() {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Rate limit of {}/min reached, waiting {:.2}s",
                        self.ceiling,
                        wait.as_secs_f64()
                    );
                    tokio::time::sleep(wait).await;
                }
            }
            self.prune(&mut timestamps, Instant::now());
        }

        timestamps.push_back(Instant::now());
        debug!("Requests in window: {}/{}", timestamps.len(), self.ceiling);
    }

    fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = timestamps.front() {
            if now - oldest >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of admissions that had to wait for room.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Fraction of the ceiling used by the current window.
    pub async fn utilization(&self) -> f64 {
        let mut timestamps = self.timestamps.lock().await;
        self.prune(&mut timestamps, Instant::now());
        #[allow(clippy::cast_precision_loss)]
        let ratio = timestamps.len() as f64 / self.ceiling as f64;
        ratio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_admits_up_to_ceiling_without_waiting() {
        let limiter = RateLimiter::new(3, true);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.admit().await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.hits(), 0);
        assert!((limiter.utilization().await - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extra_admission_waits_for_oldest_to_expire() {
        let limiter = RateLimiter::new(3, true);
        let start = Instant::now();

        for _ in 0..3 {
            limiter.admit().await;
        }
        tokio::time::advance(Duration::from_secs(10)).await;

        limiter.admit().await;

        // 10s already elapsed, so the 4th admission waits the remaining 50s
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(61));
        assert_eq!(limiter.hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_entries_expire() {
        let limiter = RateLimiter::new(2, true);
        limiter.admit().await;
        limiter.admit().await;

        tokio::time::advance(Duration::from_secs(61)).await;

        let before = Instant::now();
        limiter.admit().await;
        assert_eq!(before.elapsed(), Duration::ZERO);
        assert!((limiter.utilization().await - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_never_exceed_ceiling() {
        let limiter = Arc::new(RateLimiter::new(5, true));
        let start = Instant::now();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.admit().await;
                    start.elapsed()
                })
            })
            .collect();

        let mut elapsed = Vec::new();
        for handle in handles {
            elapsed.push(handle.await.unwrap());
        }

        let immediate = elapsed.iter().filter(|e| **e < Duration::from_secs(60)).count();
        assert_eq!(immediate, 5);
        // one wait drains the whole first window, the rest fit after it
        assert_eq!(limiter.hits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_limiter_never_waits() {
        let limiter = RateLimiter::new(1, false);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.admit().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
