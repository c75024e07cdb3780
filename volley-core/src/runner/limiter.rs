use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Global request-rate ceiling shared by every VU (GCRA).
///
/// Each `acquire` reserves the next emission slot with a CAS on the theoretical
/// arrival time and sleeps until that slot, minus the burst tolerance. Callers
/// are delayed, never rejected.
#[derive(Debug)]
pub struct RateLimiter {
    origin: Instant,
    interval_nanos: u64,
    tolerance_nanos: u64,
    /// Theoretical arrival time, in nanoseconds since `origin`.
    tat: AtomicU64,
}

impl RateLimiter {
    /// `rps` and `burst` must be non-zero; `RunConfig` validates both.
    pub fn new(rps: u64, burst: u64) -> Self {
        let interval_nanos = (1_000_000_000 / rps.max(1)).max(1);
        Self {
            origin: Instant::now(),
            interval_nanos,
            tolerance_nanos: interval_nanos.saturating_mul(burst.max(1) - 1),
            tat: AtomicU64::new(0),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_nanos)
    }

    fn now_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Reserves one slot and returns when the caller may proceed.
    fn reserve(&self) -> Instant {
        let now = self.now_nanos();
        let mut cur = self.tat.load(Ordering::Relaxed);
        loop {
            let start = cur.max(now);
            let next = start.saturating_add(self.interval_nanos);
            match self
                .tat
                .compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => {
                    let allowed = start.saturating_sub(self.tolerance_nanos).max(now);
                    return self.origin + Duration::from_nanos(allowed);
                }
                Err(actual) => cur = actual,
            }
        }
    }

    pub async fn acquire(&self) {
        let at = self.reserve();
        if at > Instant::now() {
            tokio::time::sleep_until(at).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn spaces_callers_at_the_configured_rate() {
        let limiter = RateLimiter::new(100, 1);
        let started = Instant::now();
        for _ in 0..50 {
            limiter.acquire().await;
        }
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(480) && elapsed <= Duration::from_millis(600),
            "elapsed={elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn burst_passes_immediately_then_paces() {
        let limiter = RateLimiter::new(10, 5);
        let started = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(started.elapsed() < Duration::from_millis(1));

        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(99));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_the_budget() {
        let limiter = Arc::new(RateLimiter::new(100, 1));
        let started = Instant::now();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let limiter = limiter.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    limiter.acquire().await;
                }
            }));
        }
        for t in tasks {
            t.await.unwrap_or_else(|e| panic!("{e}"));
        }

        // 100 slots at 10ms each; the first is free.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(980), "elapsed={elapsed:?}");
        assert!(elapsed <= Duration::from_millis(1_200), "elapsed={elapsed:?}");
    }
}
