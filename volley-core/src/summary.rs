use std::time::Duration;

use volley_metrics::{HistogramSummary, MetricSeriesSummary};

#[derive(Debug, Clone, Default)]
pub struct EndpointSummary {
    pub name: String,
    pub requests: u64,
    pub failed: u64,
    pub latency: HistogramSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub name: String,
    pub success: u64,
    pub rejection: u64,
    pub failure: u64,
}

impl CheckSummary {
    pub fn total(&self) -> u64 {
        self.success + self.rejection + self.failure
    }

    pub fn passed(&self) -> u64 {
        self.success + self.rejection
    }
}

/// Failed requests per step and cause: a transport error kind or an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSummary {
    pub name: String,
    pub cause: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipSummary {
    pub name: String,
    pub count: u64,
}

/// Point-in-time aggregate of a run. Every list is sorted, so two snapshots of
/// the same samples compare equal field by field.
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub elapsed: Duration,

    pub requests_total: u64,
    pub requests_failed: u64,
    pub request_failure_rate: Option<f64>,
    pub requests_per_sec: f64,

    /// Latency of every load request, in milliseconds.
    pub latency: HistogramSummary,
    pub endpoints: Vec<EndpointSummary>,

    pub checks_total: u64,
    pub checks_passed: u64,
    pub checks_pass_rate: Option<f64>,
    pub checks: Vec<CheckSummary>,

    pub iterations: u64,
    pub iteration_duration: HistogramSummary,

    pub steps_skipped: u64,
    pub skipped: Vec<SkipSummary>,

    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub vus_active_max: u64,

    pub errors: Vec<ErrorSummary>,

    /// Raw series, sorted by metric name then tags.
    pub series: Vec<MetricSeriesSummary>,
}

impl MetricsSummary {
    /// The series of `metric` whose tag set is exactly `tags`.
    pub fn find_series(&self, metric: &str, tags: &[(String, String)]) -> Option<&MetricSeriesSummary> {
        self.series.iter().find(|s| {
            s.name == metric
                && s.tags.len() == tags.len()
                && tags.iter().all(|(k, v)| s.tag(k) == Some(v.as_str()))
        })
    }

    pub fn checks_failed(&self) -> u64 {
        self.checks_total.saturating_sub(self.checks_passed)
    }
}
