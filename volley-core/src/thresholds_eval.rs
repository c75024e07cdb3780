use volley_metrics::MetricValue;

use crate::summary::MetricsSummary;
use crate::thresholds::{ThresholdAgg, ThresholdOp, ThresholdSet};

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    /// Metric selector as written back (`name{tag:value}`).
    pub metric: String,
    pub expression: String,
    pub observed: Option<f64>,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub results: Vec<ThresholdResult>,
    pub passed: bool,
}

impl Verdict {
    pub fn violations(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

/// Evaluates every threshold against a summary. Pure: the same inputs always
/// give the same verdict.
pub fn evaluate(sets: &[ThresholdSet], summary: &MetricsSummary) -> Verdict {
    let mut results = Vec::new();

    for set in sets {
        let series = summary.find_series(&set.metric, &set.tags);
        let selector = set.selector();

        for expr in &set.expressions {
            // Unknown metric or an aggregation the metric kind lacks => no value, fail.
            let observed = series.and_then(|s| observed_value(&s.values, expr.agg));
            let passed = observed.is_some_and(|v| compare(v, expr.op, expr.value));
            results.push(ThresholdResult {
                metric: selector.clone(),
                expression: expr.source.clone(),
                observed,
                passed,
            });
        }
    }

    let passed = results.iter().all(|r| r.passed);
    Verdict { results, passed }
}

fn observed_value(values: &MetricValue, agg: ThresholdAgg) -> Option<f64> {
    match (agg, values) {
        (ThresholdAgg::Count, MetricValue::Counter(n)) => Some(*n as f64),
        (ThresholdAgg::Count, MetricValue::Rate { total, .. }) => Some(*total as f64),
        (ThresholdAgg::Count, MetricValue::Histogram(h)) => Some(h.count as f64),

        (ThresholdAgg::Rate, MetricValue::Rate { rate, .. }) => *rate,

        (ThresholdAgg::Avg, MetricValue::Histogram(h)) => h.mean,
        (ThresholdAgg::Min, MetricValue::Histogram(h)) => h.min,
        (ThresholdAgg::Max, MetricValue::Histogram(h)) => h.max,
        (ThresholdAgg::Med, MetricValue::Histogram(h)) => h.p50,
        (ThresholdAgg::P(p), MetricValue::Histogram(h)) => h.percentile(p),

        (ThresholdAgg::Max | ThresholdAgg::Min, MetricValue::Gauge(g)) => Some(*g as f64),

        _ => None,
    }
}

fn compare(observed: f64, op: ThresholdOp, expected: f64) -> bool {
    match op {
        ThresholdOp::Lt => observed < expected,
        ThresholdOp::Lte => observed <= expected,
        ThresholdOp::Gt => observed > expected,
        ThresholdOp::Gte => observed >= expected,
        ThresholdOp::Eq => observed == expected,
    }
}
