use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use super::signal::Signal;

/// Decides whether a VU may start another iteration: stops on the iteration
/// cap, the duration deadline, or an explicit stop request.
#[derive(Debug)]
pub struct IterationGate {
    counter: AtomicU64,
    iterations: Option<u64>,
    duration: Option<Duration>,
    deadline: OnceLock<Instant>,
    stop: Arc<Signal>,
}

impl IterationGate {
    pub fn new(iterations: Option<u64>, duration: Option<Duration>, stop: Arc<Signal>) -> Self {
        Self {
            counter: AtomicU64::new(0),
            iterations,
            duration,
            deadline: OnceLock::new(),
            stop,
        }
    }

    pub fn start_at(&self, started: Instant) {
        if self.deadline.get().is_some() {
            return;
        }

        if let Some(duration) = self.duration {
            let _ = self.deadline.set(started + duration);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.get().copied()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_fired()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        self.stop.wait().await;
    }

    /// Iterations handed out so far.
    pub fn issued(&self) -> u64 {
        let n = self.counter.load(Ordering::Relaxed);
        self.iterations.map_or(n, |cap| n.min(cap))
    }

    pub fn next(&self) -> bool {
        if self.stop.is_fired() {
            return false;
        }

        if self.duration.is_some() {
            let now = Instant::now();

            // Lazily start the clock if the runner did not.
            if self.deadline.get().is_none() {
                self.start_at(now);
            }

            if let Some(deadline) = self.deadline.get()
                && now >= *deadline
            {
                return false;
            }
        }

        if let Some(total) = self.iterations {
            let idx = self.counter.fetch_add(1, Ordering::Relaxed);
            if idx >= total {
                return false;
            }
        } else if self.duration.is_none() {
            // Neither iterations nor duration => run once.
            let idx = self.counter.fetch_add(1, Ordering::Relaxed);
            if idx > 0 {
                return false;
            }
        } else {
            self.counter.fetch_add(1, Ordering::Relaxed);
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iteration_cap_is_shared() {
        let gate = IterationGate::new(Some(3), None, Arc::new(Signal::new()));
        let granted = (0..10).filter(|_| gate.next()).count();
        assert_eq!(granted, 3);
        assert_eq!(gate.issued(), 3);
    }

    #[test]
    fn no_limits_means_one_iteration() {
        let gate = IterationGate::new(None, None, Arc::new(Signal::new()));
        assert!(gate.next());
        assert!(!gate.next());
    }

    #[test]
    fn stop_signal_closes_gate() {
        let stop = Arc::new(Signal::new());
        let gate = IterationGate::new(Some(100), None, stop.clone());
        assert!(gate.next());
        stop.fire();
        assert!(!gate.next());
        assert!(gate.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_closes_gate() {
        let gate = IterationGate::new(None, Some(Duration::from_secs(2)), Arc::new(Signal::new()));
        gate.start_at(Instant::now());
        assert!(gate.next());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(gate.next());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!gate.next());
        assert_eq!(gate.issued(), 2);
    }
}
