use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use volley_metrics::{RunningStats, per_sec};

use crate::metrics::RunMetrics;
use crate::thresholds::ThresholdSet;
use crate::thresholds_eval::{Verdict, evaluate};

pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct LiveMetrics {
    /// Requests/sec observed during the last progress interval.
    pub rps_now: f64,

    /// Requests/sec statistics across progress intervals.
    pub rps: RunningStats,

    pub requests_total: u64,
    pub requests_failed: u64,

    /// Failed requests / total requests during the last interval (0..=1).
    pub error_rate_now: f64,

    pub checks_failed_total: u64,
    pub steps_skipped_total: u64,

    pub iterations_total: u64,
    pub iterations_per_sec_now: f64,

    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,

    /// Whole-run latency so far, in milliseconds.
    pub latency_mean_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Monotonic tick counter (1-based).
    pub tick: u64,
    pub elapsed: Duration,
    /// Planned run duration, if the run is time-bound.
    pub duration: Option<Duration>,
    pub vus: u64,
    pub vus_active: i64,
    pub metrics: LiveMetrics,
    /// Thresholds evaluated against the live snapshot. Informational only.
    pub verdict: Verdict,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

pub(crate) struct ProgressSource {
    pub metrics: Arc<RunMetrics>,
    pub thresholds: Vec<ThresholdSet>,
    pub started: Instant,
    pub duration: Option<Duration>,
    pub vus: u64,
}

/// Aborts the progress task when dropped.
pub(crate) struct ProgressTask(JoinHandle<()>);

impl Drop for ProgressTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub(crate) fn spawn_progress(src: ProgressSource, progress: ProgressFn) -> ProgressTask {
    ProgressTask(tokio::spawn(async move {
        let mut interval =
            tokio::time::interval_at(src.started + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut tick: u64 = 0;
        let mut rps = RunningStats::default();
        let mut last_at = src.started;
        let mut last_requests: u64 = 0;
        let mut last_failed: u64 = 0;
        let mut last_iterations: u64 = 0;

        loop {
            interval.tick().await;

            tick = tick.saturating_add(1);
            let now = Instant::now();
            let dt = now.duration_since(last_at).as_secs_f64();
            last_at = now;

            let summary = src.metrics.snapshot(now.duration_since(src.started));

            let delta_requests = summary.requests_total.saturating_sub(last_requests);
            let delta_failed = summary.requests_failed.saturating_sub(last_failed);
            let delta_iterations = summary.iterations.saturating_sub(last_iterations);
            last_requests = summary.requests_total;
            last_failed = summary.requests_failed;
            last_iterations = summary.iterations;

            let rps_now = per_sec(delta_requests, dt);
            rps.push(rps_now);

            let error_rate_now = if delta_requests == 0 {
                0.0
            } else {
                delta_failed as f64 / delta_requests as f64
            };

            let verdict = evaluate(&src.thresholds, &summary);
            let metrics = LiveMetrics {
                rps_now,
                rps,
                requests_total: summary.requests_total,
                requests_failed: summary.requests_failed,
                error_rate_now,
                checks_failed_total: summary.checks_failed(),
                steps_skipped_total: summary.steps_skipped,
                iterations_total: summary.iterations,
                iterations_per_sec_now: per_sec(delta_iterations, dt),
                bytes_received_total: summary.bytes_received,
                bytes_sent_total: summary.bytes_sent,
                latency_mean_ms: summary.latency.mean,
                latency_p95_ms: summary.latency.p95,
                latency_p99_ms: summary.latency.p99,
            };

            progress(ProgressUpdate {
                tick,
                elapsed: summary.elapsed,
                duration: src.duration,
                vus: src.vus,
                vus_active: src.metrics.vus_active(),
                metrics,
                verdict,
            });
        }
    }))
}
