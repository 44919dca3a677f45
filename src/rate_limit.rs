//! Outbound call throttling.
//!
//! Each external service gets a [`RateLimiter`] admitting at most
//! `calls_limit` calls per rolling `period`. The limiter keeps a log of
//! admission timestamps; a caller that finds the log full sleeps until the
//! oldest entry ages out of the window, then tries again.
//!
//! Limiters are constructed explicitly and shared as `Arc<dyn Throttle>`,
//! so several clients can draw from one quota and tests can swap in
//! [`Unthrottled`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Admission control for outbound calls.
#[async_trait]
pub trait Throttle: Send + Sync + Debug {
    /// Wait until a call may proceed, and record it.
    async fn acquire(&self);
}

/// Sliding-window limiter: `calls_limit` admissions per `period`.
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    calls_limit: usize,
    period: Duration,
    log: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// A zero `calls_limit` is treated as one.
    pub fn new(name: &'static str, calls_limit: usize, period: Duration) -> Self {
        let calls_limit = calls_limit.max(1);
        Self {
            name,
            calls_limit,
            period,
            log: Mutex::new(VecDeque::with_capacity(calls_limit)),
        }
    }

    /// Admit now if the window has room, otherwise return how long to wait.
    fn try_admit(&self, now: Instant) -> Result<(), Duration> {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());

        while let Some(&oldest) = log.front() {
            if now.duration_since(oldest) >= self.period {
                log.pop_front();
            } else {
                break;
            }
        }

        if log.len() < self.calls_limit {
            log.push_back(now);
            return Ok(());
        }

        // Log is full, so `front` exists.
        let oldest = log.front().copied().unwrap_or(now);
        Err(self.period.saturating_sub(now.duration_since(oldest)))
    }
}

#[async_trait]
impl Throttle for RateLimiter {
    async fn acquire(&self) {
        loop {
            match self.try_admit(Instant::now()) {
                Ok(()) => return,
                Err(wait) => {
                    debug!(
                        limiter = self.name,
                        calls_limit = self.calls_limit,
                        period_secs = self.period.as_secs(),
                        wait_ms = wait.as_millis() as u64,
                        "Rate limit reached, waiting"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

/// A limiter that never waits.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unthrottled;

#[async_trait]
impl Throttle for Unthrottled {
    async fn acquire(&self) {}
}

/// Counts admissions and never waits.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct CountingThrottle {
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl CountingThrottle {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl Throttle for CountingThrottle {
    async fn acquire(&self) {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_calls_within_limit_do_not_wait() {
        let limiter = RateLimiter::new("test", 3, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extra_call_blocks_until_window_passes() {
        let limiter = RateLimiter::new("test", 2, Duration::from_secs(60));
        let start = Instant::now();
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.acquire().await;

        limiter.acquire().await;
        // The first admission ages out at t=60s.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(70), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_entries_are_pruned() {
        let limiter = RateLimiter::new("test", 1, Duration::from_secs(5));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(6)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_limiter_across_tasks() {
        let limiter = Arc::new(RateLimiter::new("test", 3, Duration::from_secs(10)));
        let start = Instant::now();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut admitted = Vec::new();
        for h in handles {
            admitted.push(h.await.unwrap());
        }

        let immediate = admitted
            .iter()
            .filter(|t| t.duration_since(start) < Duration::from_secs(1))
            .count();
        assert_eq!(immediate, 3);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[test]
    fn test_try_admit_reports_wait() {
        let limiter = RateLimiter::new("test", 1, Duration::from_secs(30));
        let now = Instant::now();
        assert!(limiter.try_admit(now).is_ok());
        let wait = limiter.try_admit(now + Duration::from_secs(10)).unwrap_err();
        assert_eq!(wait, Duration::from_secs(20));
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let limiter = RateLimiter::new("test", 0, Duration::from_secs(1));
        assert_eq!(limiter.calls_limit, 1);
    }

    #[tokio::test]
    async fn test_unthrottled_never_waits() {
        let limiter = Unthrottled;
        for _ in 0..100 {
            limiter.acquire().await;
        }
    }
}
