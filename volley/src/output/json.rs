use serde::Serialize;
use std::io::Write as _;
use std::sync::Arc;

use volley_core::runner::{ProgressFn, ProgressUpdate, RunReport};
use volley_core::{HistogramSummary, MetricsSummary};

use super::{OutputFormatter, RunHeader};

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _header: &RunHeader<'_>) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()> {
        let line = build_summary_line(report);
        emit_json_line(&line);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub vus: u64,
    pub vus_active: i64,

    pub requests_per_sec: f64,
    pub iterations_per_sec: f64,
    pub error_rate: f64,

    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_iterations: u64,
    pub total_bytes_received: u64,
    pub total_bytes_sent: u64,
    pub checks_failed_total: u64,
    pub steps_skipped_total: u64,

    pub latency_mean_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub latency_p99_ms: Option<f64>,

    pub req_per_sec_avg: f64,
    pub req_per_sec_stdev: f64,
    pub req_per_sec_max: f64,

    pub thresholds_failing: usize,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    let m = &u.metrics;
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        vus: u.vus,
        vus_active: u.vus_active,

        requests_per_sec: m.rps_now,
        iterations_per_sec: m.iterations_per_sec_now,
        error_rate: m.error_rate_now,

        total_requests: m.requests_total,
        failed_requests: m.requests_failed,
        total_iterations: m.iterations_total,
        total_bytes_received: m.bytes_received_total,
        total_bytes_sent: m.bytes_sent_total,
        checks_failed_total: m.checks_failed_total,
        steps_skipped_total: m.steps_skipped_total,

        latency_mean_ms: m.latency_mean_ms,
        latency_p95_ms: m.latency_p95_ms,
        latency_p99_ms: m.latency_p99_ms,

        req_per_sec_avg: m.rps.mean(),
        req_per_sec_stdev: m.rps.stdev(),
        req_per_sec_max: m.rps.max(),

        thresholds_failing: u.verdict.violations().count(),
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub passed: bool,
    pub aborted: bool,
    pub interrupted_vus: u64,
    pub elapsed_secs: f64,
    pub totals: JsonTotals,
    pub latency: JsonLatencySummary,
    pub endpoints: Vec<JsonEndpoint>,
    pub checks: Vec<JsonCheck>,
    pub errors: Vec<JsonError>,
    pub skipped: Vec<JsonSkip>,
    pub thresholds: Vec<JsonThreshold>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
}

#[derive(Debug, Serialize, Default)]
pub(crate) struct JsonTotals {
    pub requests_total: u64,
    pub failed_requests_total: u64,
    pub request_failure_rate: Option<f64>,
    pub requests_per_sec: f64,
    pub iterations_total: u64,
    pub checks_total: u64,
    pub checks_passed: u64,
    pub checks_pass_rate: Option<f64>,
    pub steps_skipped_total: u64,
    pub bytes_received_total: u64,
    pub bytes_sent_total: u64,
    pub vus_active_max: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonLatencySummary {
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub stdev: Option<f64>,
    pub count: u64,
}

impl From<&HistogramSummary> for JsonLatencySummary {
    fn from(h: &HistogramSummary) -> Self {
        Self {
            p50: h.p50,
            p75: h.p75,
            p90: h.p90,
            p95: h.p95,
            p99: h.p99,
            min: h.min,
            max: h.max,
            mean: h.mean,
            stdev: h.stdev,
            count: h.count,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonEndpoint {
    pub name: String,
    pub requests: u64,
    pub failed: u64,
    pub latency: JsonLatencySummary,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonCheck {
    pub name: String,
    pub success: u64,
    pub rejection: u64,
    pub failure: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonError {
    pub name: String,
    pub cause: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSkip {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

fn totals(s: &MetricsSummary) -> JsonTotals {
    JsonTotals {
        requests_total: s.requests_total,
        failed_requests_total: s.requests_failed,
        request_failure_rate: s.request_failure_rate,
        requests_per_sec: s.requests_per_sec,
        iterations_total: s.iterations,
        checks_total: s.checks_total,
        checks_passed: s.checks_passed,
        checks_pass_rate: s.checks_pass_rate,
        steps_skipped_total: s.steps_skipped,
        bytes_received_total: s.bytes_received,
        bytes_sent_total: s.bytes_sent,
        vus_active_max: s.vus_active_max,
    }
}

fn build_summary_line(report: &RunReport) -> JsonSummaryLine {
    let s = &report.summary;

    JsonSummaryLine {
        kind: "summary",
        passed: report.verdict.passed,
        aborted: report.aborted,
        interrupted_vus: report.interrupted_vus,
        elapsed_secs: s.elapsed.as_secs_f64(),
        totals: totals(s),
        latency: JsonLatencySummary::from(&s.latency),
        endpoints: s
            .endpoints
            .iter()
            .map(|e| JsonEndpoint {
                name: e.name.clone(),
                requests: e.requests,
                failed: e.failed,
                latency: JsonLatencySummary::from(&e.latency),
            })
            .collect(),
        checks: s
            .checks
            .iter()
            .map(|c| JsonCheck {
                name: c.name.clone(),
                success: c.success,
                rejection: c.rejection,
                failure: c.failure,
            })
            .collect(),
        errors: s
            .errors
            .iter()
            .map(|e| JsonError {
                name: e.name.clone(),
                cause: e.cause.clone(),
                count: e.count,
            })
            .collect(),
        skipped: s
            .skipped
            .iter()
            .map(|k| JsonSkip {
                name: k.name.clone(),
                count: k.count,
            })
            .collect(),
        thresholds: report
            .verdict
            .results
            .iter()
            .map(|r| JsonThreshold {
                metric: r.metric.clone(),
                expression: r.expression.clone(),
                observed: r.observed,
                passed: r.passed,
            })
            .collect(),
        teardown_error: report.teardown_error.clone(),
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use volley_core::{CheckSummary, ThresholdResult, Verdict};

    #[test]
    fn summary_line_has_totals_checks_and_thresholds() {
        let report = RunReport {
            summary: MetricsSummary {
                requests_total: 10,
                requests_failed: 1,
                iterations: 5,
                checks_total: 10,
                checks_passed: 9,
                checks: vec![CheckSummary {
                    name: "auth ok".to_string(),
                    success: 8,
                    rejection: 1,
                    failure: 1,
                }],
                ..MetricsSummary::default()
            },
            verdict: Verdict {
                results: vec![ThresholdResult {
                    metric: "checks".to_string(),
                    expression: "rate>0.9999".to_string(),
                    observed: Some(0.9),
                    passed: false,
                }],
                passed: false,
            },
            interrupted_vus: 0,
            aborted: false,
            teardown_error: None,
        };

        let line = build_summary_line(&report);
        let v: Value = match serde_json::to_value(&line) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };

        assert_eq!(v.get("kind").and_then(Value::as_str), Some("summary"));
        assert_eq!(v.get("passed").and_then(Value::as_bool), Some(false));
        assert_eq!(
            v.pointer("/totals/requests_total").and_then(Value::as_u64),
            Some(10)
        );
        assert_eq!(
            v.pointer("/checks/0/rejection").and_then(Value::as_u64),
            Some(1)
        );
        assert_eq!(
            v.pointer("/thresholds/0/expression").and_then(Value::as_str),
            Some("rate>0.9999")
        );
        assert!(v.get("teardown_error").is_none());
    }
}
