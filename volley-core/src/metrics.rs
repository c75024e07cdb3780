use std::collections::BTreeMap;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::time::Instant;
use volley_http::HttpTransportErrorKind;
use volley_metrics::{MetricHandle, MetricId, MetricKind, Registry, TagSet};

use crate::error::Result;
use crate::executor::SkipReason;
use crate::scenario::CheckClass;
use crate::summary::{CheckSummary, EndpointSummary, ErrorSummary, MetricsSummary, SkipSummary};
use crate::thresholds::{ThresholdAgg, ThresholdSet};

pub const HTTP_REQS: &str = "http_reqs";
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const HTTP_REQ_ERRORS: &str = "http_req_errors";
pub const CHECKS: &str = "checks";
pub const CHECKS_BY_CLASS: &str = "checks_by_class";
pub const ITERATIONS: &str = "iterations";
pub const ITERATION_DURATION: &str = "iteration_duration";
pub const STEPS_SKIPPED: &str = "steps_skipped";
pub const DATA_SENT: &str = "data_sent";
pub const DATA_RECEIVED: &str = "data_received";
pub const VUS_ACTIVE: &str = "vus_active";
pub const VUS_ACTIVE_MAX: &str = "vus_active_max";

const TAG_NAME: &str = "name";
const TAG_CLASS: &str = "class";
const TAG_REASON: &str = "reason";
const TAG_ERROR_KIND: &str = "error_kind";
const TAG_STATUS: &str = "status";

/// Durations are recorded in microseconds and reported in milliseconds.
const MICROS_PER_MILLI: f64 = 1000.0;

/// One executed HTTP request.
#[derive(Debug, Clone)]
pub struct RequestSample<'a> {
    pub name: &'a str,
    pub method: http::Method,
    pub latency: Duration,
    /// `None` on transport error.
    pub status: Option<u16>,
    pub error_kind: Option<HttpTransportErrorKind>,
    pub failed: bool,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub at: Instant,
}

#[derive(Debug, Clone)]
pub struct CheckOutcome<'a> {
    pub label: &'a str,
    pub passed: bool,
    pub class: CheckClass,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct MetricIds {
    http_reqs: MetricId,
    http_req_duration: MetricId,
    http_req_failed: MetricId,
    http_req_errors: MetricId,
    checks: MetricId,
    checks_by_class: MetricId,
    iterations: MetricId,
    iteration_duration: MetricId,
    steps_skipped: MetricId,
    data_sent: MetricId,
    data_received: MetricId,
}

#[derive(Debug, Clone)]
struct RequestHandles {
    reqs: MetricHandle,
    duration: MetricHandle,
    failed: MetricHandle,
    sent: MetricHandle,
    received: MetricHandle,
}

#[derive(Debug, Clone)]
struct CheckHandles {
    rate: MetricHandle,
    by_class: [MetricHandle; 3],
}

const CLASSES: [CheckClass; 3] = [CheckClass::Success, CheckClass::Rejection, CheckClass::Failure];

fn class_idx(class: CheckClass) -> usize {
    match class {
        CheckClass::Success => 0,
        CheckClass::Rejection => 1,
        CheckClass::Failure => 2,
    }
}

/// Thread-safe ingestion surface for one run.
///
/// Writers hold the shared side of `ingest` for the duration of one sample;
/// [`RunMetrics::snapshot`] takes the exclusive side so it never observes half of
/// a sample (e.g. a request counted without its latency).
#[derive(Debug)]
pub struct RunMetrics {
    registry: Registry,
    ingest: RwLock<()>,
    ids: MetricIds,

    base: RequestHandles,
    checks: CheckHandles,
    iterations: MetricHandle,
    iteration_duration: MetricHandle,
    skipped: MetricHandle,
    vus_active: MetricHandle,
    vus_active_max: MetricHandle,

    steps: DashMap<String, RequestHandles>,
    check_series: DashMap<String, CheckHandles>,
}

impl RunMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::default();
        let ids = MetricIds {
            http_reqs: registry.register(HTTP_REQS, MetricKind::Counter)?,
            http_req_duration: registry.register_scaled(
                HTTP_REQ_DURATION,
                MetricKind::Histogram,
                MICROS_PER_MILLI,
            )?,
            http_req_failed: registry.register(HTTP_REQ_FAILED, MetricKind::Rate)?,
            http_req_errors: registry.register(HTTP_REQ_ERRORS, MetricKind::Counter)?,
            checks: registry.register(CHECKS, MetricKind::Rate)?,
            checks_by_class: registry.register(CHECKS_BY_CLASS, MetricKind::Counter)?,
            iterations: registry.register(ITERATIONS, MetricKind::Counter)?,
            iteration_duration: registry.register_scaled(
                ITERATION_DURATION,
                MetricKind::Histogram,
                MICROS_PER_MILLI,
            )?,
            steps_skipped: registry.register(STEPS_SKIPPED, MetricKind::Counter)?,
            data_sent: registry.register(DATA_SENT, MetricKind::Counter)?,
            data_received: registry.register(DATA_RECEIVED, MetricKind::Counter)?,
        };
        let vus_active = registry.register(VUS_ACTIVE, MetricKind::Gauge)?;
        let vus_active_max = registry.register(VUS_ACTIVE_MAX, MetricKind::Gauge)?;

        let series = |id: MetricId, kind: MetricKind, tags: &[(&str, &str)]| {
            registry
                .handle(id, registry.resolve_tags(tags))
                .unwrap_or_else(|| MetricHandle::new(kind))
        };

        let base = request_handles(&registry, &ids, &[]);
        let checks = CheckHandles {
            rate: series(ids.checks, MetricKind::Rate, &[]),
            by_class: CLASSES.map(|c| {
                series(ids.checks_by_class, MetricKind::Counter, &[(TAG_CLASS, c.into())])
            }),
        };
        let iterations = series(ids.iterations, MetricKind::Counter, &[]);
        let iteration_duration = series(ids.iteration_duration, MetricKind::Histogram, &[]);
        let skipped = series(ids.steps_skipped, MetricKind::Counter, &[]);
        let vus_active = series(vus_active, MetricKind::Gauge, &[]);
        let vus_active_max = series(vus_active_max, MetricKind::Gauge, &[]);

        Ok(Self {
            registry,
            ingest: RwLock::new(()),
            ids,
            base,
            checks,
            iterations,
            iteration_duration,
            skipped,
            vus_active,
            vus_active_max,
            steps: DashMap::new(),
            check_series: DashMap::new(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Summarizes histograms at every `p(N)` the thresholds ask for, including
    /// points outside the fixed percentile table.
    pub fn track_thresholds(&self, sets: &[ThresholdSet]) {
        for expr in sets.iter().flat_map(|s| &s.expressions) {
            if let ThresholdAgg::P(p) = expr.agg {
                self.registry.track_percentile(p);
            }
        }
    }

    fn counter(&self, id: MetricId, tags: &[(&str, &str)]) -> MetricHandle {
        self.registry
            .handle(id, self.registry.resolve_tags(tags))
            .unwrap_or_else(|| MetricHandle::new(MetricKind::Counter))
    }

    fn with_step<R>(&self, name: &str, f: impl FnOnce(&RequestHandles) -> R) -> R {
        if let Some(h) = self.steps.get(name) {
            return f(h.value());
        }
        let h = self
            .steps
            .entry(name.to_string())
            .or_insert_with(|| request_handles(&self.registry, &self.ids, &[(TAG_NAME, name)]));
        f(h.value())
    }

    fn with_check<R>(&self, name: &str, f: impl FnOnce(&CheckHandles) -> R) -> R {
        if let Some(h) = self.check_series.get(name) {
            return f(h.value());
        }
        let h = self.check_series.entry(name.to_string()).or_insert_with(|| CheckHandles {
            rate: self
                .registry
                .handle(self.ids.checks, self.registry.resolve_tags(&[(TAG_NAME, name)]))
                .unwrap_or_else(|| MetricHandle::new(MetricKind::Rate)),
            by_class: CLASSES.map(|c| {
                self.counter(self.ids.checks_by_class, &[(TAG_NAME, name), (TAG_CLASS, c.into())])
            }),
        });
        f(h.value())
    }

    pub fn record_request(&self, sample: &RequestSample<'_>) {
        let _ingest = self.ingest.read();
        let micros = u64::try_from(sample.latency.as_micros()).unwrap_or(u64::MAX);

        let apply = |h: &RequestHandles| {
            h.reqs.add(1);
            h.duration.observe(micros);
            h.failed.hit(sample.failed);
            h.sent.add(sample.bytes_sent);
            h.received.add(sample.bytes_received);
        };
        apply(&self.base);
        self.with_step(sample.name, apply);

        if sample.failed {
            let cause = match (sample.error_kind, sample.status) {
                (Some(kind), _) => (TAG_ERROR_KIND, kind.to_string()),
                (None, Some(status)) => (TAG_STATUS, status.to_string()),
                (None, None) => (TAG_ERROR_KIND, "unknown".to_string()),
            };
            self.counter(
                self.ids.http_req_errors,
                &[(TAG_NAME, sample.name), (cause.0, cause.1.as_str())],
            )
            .add(1);
        }
    }

    pub fn record_check(&self, outcome: &CheckOutcome<'_>) {
        let _ingest = self.ingest.read();
        let idx = class_idx(outcome.class);

        self.checks.rate.hit(outcome.passed);
        self.checks.by_class[idx].add(1);
        self.with_check(outcome.label, |h| {
            h.rate.hit(outcome.passed);
            h.by_class[idx].add(1);
        });
    }

    pub fn record_iteration(&self, duration: Duration) {
        let _ingest = self.ingest.read();
        self.iterations.add(1);
        self.iteration_duration
            .observe(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX));
    }

    pub fn record_skip(&self, step: &str, reason: SkipReason) {
        let _ingest = self.ingest.read();
        self.skipped.add(1);
        self.counter(self.ids.steps_skipped, &[(TAG_NAME, step)]).add(1);
        self.counter(self.ids.steps_skipped, &[(TAG_REASON, reason.into())])
            .add(1);
    }

    /// Marks one VU loop as running until the guard drops.
    pub fn vu_started(&self) -> ActiveVuGuard<'_> {
        let now = self.vus_active.add_gauge(1);
        self.vus_active_max.raise_to(now);
        ActiveVuGuard { metrics: self }
    }

    pub fn vus_active(&self) -> i64 {
        self.vus_active.gauge()
    }

    pub fn requests_total(&self) -> u64 {
        self.base.reqs.counter()
    }

    pub fn snapshot(&self, elapsed: Duration) -> MetricsSummary {
        let _ingest = self.ingest.write();
        let reg = &self.registry;
        let ids = &self.ids;

        let requests_total = self.base.reqs.counter();
        let (_, requests_failed) = self.base.failed.rate();
        let latency = reg
            .query(ids.http_req_duration)
            .untagged()
            .merge_histogram_single()
            .unwrap_or_default();

        let mut endpoints: Vec<EndpointSummary> = self
            .steps
            .iter()
            .map(|entry| {
                let name = entry.key().clone();
                let latency = reg
                    .query(ids.http_req_duration)
                    .where_eq(TAG_NAME, &name)
                    .merge_histogram_single()
                    .unwrap_or_default();
                EndpointSummary {
                    requests: entry.value().reqs.counter(),
                    failed: entry.value().failed.rate().1,
                    latency,
                    name,
                }
            })
            .collect();
        endpoints.sort_by(|a, b| a.name.cmp(&b.name));

        let (checks_total, checks_passed) = self.checks.rate.rate();
        let mut checks: Vec<CheckSummary> = self
            .check_series
            .iter()
            .map(|entry| CheckSummary {
                name: entry.key().clone(),
                success: entry.value().by_class[0].counter(),
                rejection: entry.value().by_class[1].counter(),
                failure: entry.value().by_class[2].counter(),
            })
            .collect();
        checks.sort_by(|a, b| a.name.cmp(&b.name));

        let skipped_q = reg.query(ids.steps_skipped).where_has(TAG_NAME).group_by(&[TAG_NAME]);
        let mut skipped: Vec<SkipSummary> = skipped_q
            .sum_counter()
            .into_iter()
            .filter_map(|(tags, count)| {
                tag_value(&skipped_q.describe(&tags), TAG_NAME).map(|name| SkipSummary { name, count })
            })
            .collect();
        skipped.sort_by(|a, b| a.name.cmp(&b.name));

        let errors_q = reg
            .query(ids.http_req_errors)
            .group_by(&[TAG_NAME, TAG_ERROR_KIND, TAG_STATUS]);
        let mut grouped: BTreeMap<(String, String), u64> = BTreeMap::new();
        for (tags, count) in errors_q.sum_counter() {
            let pairs = errors_q.describe(&tags);
            let name = tag_value(&pairs, TAG_NAME).unwrap_or_default();
            let cause = match (tag_value(&pairs, TAG_ERROR_KIND), tag_value(&pairs, TAG_STATUS)) {
                (Some(kind), _) => kind,
                (None, Some(status)) => format!("status {status}"),
                (None, None) => continue,
            };
            *grouped.entry((name, cause)).or_insert(0) += count;
        }
        let errors = grouped
            .into_iter()
            .map(|((name, cause), count)| ErrorSummary { name, cause, count })
            .collect();

        MetricsSummary {
            elapsed,
            requests_total,
            requests_failed,
            request_failure_rate: ratio(requests_failed, requests_total),
            requests_per_sec: volley_metrics::per_sec(requests_total, elapsed.as_secs_f64()),
            latency,
            endpoints,
            checks_total,
            checks_passed,
            checks_pass_rate: ratio(checks_passed, checks_total),
            checks,
            iterations: self.iterations.counter(),
            iteration_duration: reg
                .query(ids.iteration_duration)
                .untagged()
                .merge_histogram_single()
                .unwrap_or_default(),
            steps_skipped: self.skipped.counter(),
            skipped,
            bytes_sent: self.base.sent.counter(),
            bytes_received: self.base.received.counter(),
            vus_active_max: u64::try_from(self.vus_active_max.gauge()).unwrap_or(0),
            errors,
            series: reg.summarize(),
        }
    }
}

fn request_handles(reg: &Registry, ids: &MetricIds, tags: &[(&str, &str)]) -> RequestHandles {
    let tags: TagSet = reg.resolve_tags(tags);
    let h = |id: MetricId, kind: MetricKind| {
        reg.handle(id, tags.clone())
            .unwrap_or_else(|| MetricHandle::new(kind))
    };
    RequestHandles {
        reqs: h(ids.http_reqs, MetricKind::Counter),
        duration: h(ids.http_req_duration, MetricKind::Histogram),
        failed: h(ids.http_req_failed, MetricKind::Rate),
        sent: h(ids.data_sent, MetricKind::Counter),
        received: h(ids.data_received, MetricKind::Counter),
    }
}

fn tag_value(pairs: &[(String, String)], key: &str) -> Option<String> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

fn ratio(hits: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| hits as f64 / total as f64)
}

pub struct ActiveVuGuard<'a> {
    metrics: &'a RunMetrics,
}

impl Drop for ActiveVuGuard<'_> {
    fn drop(&mut self) {
        self.metrics.vus_active.add_gauge(-1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_metrics::MetricValue;

    fn metrics() -> RunMetrics {
        RunMetrics::new().unwrap_or_else(|e| panic!("{e}"))
    }

    fn sample(name: &str, ms: u64, status: Option<u16>, failed: bool) -> RequestSample<'_> {
        RequestSample {
            name,
            method: http::Method::GET,
            latency: Duration::from_millis(ms),
            status,
            error_kind: status.is_none().then_some(HttpTransportErrorKind::Timeout),
            failed,
            bytes_sent: 10,
            bytes_received: 20,
            at: Instant::now(),
        }
    }

    #[test]
    fn p95_of_known_latencies_is_within_histogram_error() {
        let m = metrics();
        for ms in 1..=1000u64 {
            m.record_request(&sample("info", ms, Some(200), false));
        }

        let s = m.snapshot(Duration::from_secs(10));
        assert_eq!(s.requests_total, 1000);
        let p95 = s.latency.p95.unwrap_or_else(|| panic!("no p95"));
        assert!((p95 - 950.0).abs() <= 950.0 * 0.01, "p95={p95}");
        assert_eq!(s.requests_per_sec, 100.0);
        assert_eq!(s.bytes_sent, 10_000);
    }

    #[tokio::test]
    async fn requests_checks_and_errors_are_split_by_step() {
        let m = metrics();
        m.record_request(&sample("auth", 5, Some(200), false));
        m.record_request(&sample("auth", 5, Some(500), true));
        m.record_request(&sample("info", 5, None, true));

        let at = Instant::now();
        for class in [CheckClass::Success, CheckClass::Failure] {
            m.record_check(&CheckOutcome {
                label: "auth",
                passed: class.passed(),
                class,
                at,
            });
        }
        m.record_check(&CheckOutcome {
            label: "info",
            passed: true,
            class: CheckClass::Rejection,
            at,
        });
        m.record_skip("buy", SkipReason::Dependency);
        m.record_iteration(Duration::from_millis(30));

        let s = m.snapshot(Duration::from_secs(1));
        assert_eq!(s.requests_total, 3);
        assert_eq!(s.requests_failed, 2);
        assert_eq!(s.endpoints.len(), 2);
        assert_eq!(s.endpoints[0].name, "auth");
        assert_eq!(s.endpoints[0].failed, 1);

        assert_eq!((s.checks_total, s.checks_passed), (3, 2));
        assert_eq!(
            s.checks,
            vec![
                CheckSummary {
                    name: "auth".to_string(),
                    success: 1,
                    rejection: 0,
                    failure: 1
                },
                CheckSummary {
                    name: "info".to_string(),
                    success: 0,
                    rejection: 1,
                    failure: 0
                },
            ]
        );

        assert_eq!(s.steps_skipped, 1);
        assert_eq!(s.skipped[0].name, "buy");
        assert_eq!(s.iterations, 1);

        assert_eq!(
            s.errors,
            vec![
                ErrorSummary {
                    name: "auth".to_string(),
                    cause: "status 500".to_string(),
                    count: 1
                },
                ErrorSummary {
                    name: "info".to_string(),
                    cause: "timeout".to_string(),
                    count: 1
                },
            ]
        );

        let failures = s
            .find_series(CHECKS_BY_CLASS, &[("class".to_string(), "failure".to_string())])
            .unwrap_or_else(|| panic!("missing class series"));
        assert!(matches!(failures.values, MetricValue::Counter(1)));
    }

    #[test]
    fn active_vu_guard_tracks_peak() {
        let m = metrics();
        {
            let _a = m.vu_started();
            let _b = m.vu_started();
            assert_eq!(m.vus_active(), 2);
        }
        let _c = m.vu_started();
        assert_eq!(m.vus_active(), 1);
        assert_eq!(m.snapshot(Duration::from_secs(1)).vus_active_max, 2);
    }
}
