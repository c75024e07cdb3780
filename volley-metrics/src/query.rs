use std::collections::HashMap;

use hdrhistogram::Histogram;
use smallvec::SmallVec;

use crate::key::KeyId;
use crate::metrics::{HistogramSummary, MetricHandle, new_default_histogram, summarize_histogram};
use crate::registry::{MetricId, Registry};
use crate::tags::TagSet;

#[derive(Debug, Clone, Copy)]
enum TagFilter {
    Eq(KeyId, KeyId),
    Has(KeyId),
    Missing(KeyId),
    Untagged,
    Nothing,
}

impl TagFilter {
    fn matches(&self, tags: &TagSet) -> bool {
        match *self {
            TagFilter::Eq(k, v) => tags.get(k) == Some(v),
            TagFilter::Has(k) => tags.get(k).is_some(),
            TagFilter::Missing(k) => tags.get(k).is_none(),
            TagFilter::Untagged => tags.is_empty(),
            TagFilter::Nothing => false,
        }
    }
}

/// Welford running mean/stdev, used for per-interval throughput samples.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunningStats {
    n: u64,
    mean: f64,
    m2: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, x: f64) {
        self.n = self.n.saturating_add(1);
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
        self.max = self.max.max(x);
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn stdev(&self) -> f64 {
        if self.n < 2 {
            return 0.0;
        }
        (self.m2 / (self.n as f64 - 1.0)).sqrt()
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[inline]
pub fn per_sec(delta: u64, dt_secs: f64) -> f64 {
    delta as f64 / dt_secs.max(1e-9)
}

/// Filtered, optionally grouped read over the series of one metric.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    registry: &'a Registry,
    metric: MetricId,
    filters: SmallVec<[TagFilter; 4]>,
    group_keys: SmallVec<[KeyId; 4]>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(registry: &'a Registry, metric: MetricId) -> Self {
        Self {
            registry,
            metric,
            filters: SmallVec::new(),
            group_keys: SmallVec::new(),
        }
    }

    /// Restricts to series tagged `key=value`. Never-seen keys or values match nothing.
    #[must_use]
    pub fn where_eq(mut self, key: &str, value: &str) -> Self {
        let filter = match (
            self.registry.lookup_key(key),
            self.registry.lookup_key(value),
        ) {
            (Some(k), Some(v)) => TagFilter::Eq(k, v),
            _ => TagFilter::Nothing,
        };
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn where_has(mut self, key: &str) -> Self {
        let filter = self
            .registry
            .lookup_key(key)
            .map_or(TagFilter::Nothing, TagFilter::Has);
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn where_missing(mut self, key: &str) -> Self {
        if let Some(k) = self.registry.lookup_key(key) {
            self.filters.push(TagFilter::Missing(k));
        }
        self
    }

    /// Only the untagged base series.
    #[must_use]
    pub fn untagged(mut self) -> Self {
        self.filters.push(TagFilter::Untagged);
        self
    }

    #[must_use]
    pub fn group_by(mut self, keys: &[&str]) -> Self {
        let mut ids: SmallVec<[KeyId; 4]> = keys
            .iter()
            .filter_map(|k| self.registry.lookup_key(k))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        self.group_keys = ids;
        self
    }

    fn for_each_match(&self, mut f: impl FnMut(TagSet, &MetricHandle)) {
        self.registry.visit_series(self.metric, |tags, handle| {
            if self.filters.iter().all(|flt| flt.matches(tags)) {
                f(tags.project(&self.group_keys), handle);
            }
        });
    }

    /// Resolves a group key back to readable `(key, value)` pairs.
    pub fn describe(&self, tags: &TagSet) -> Vec<(String, String)> {
        tags.iter()
            .map(|(k, v)| {
                (
                    self.registry.resolve_string(k),
                    self.registry.resolve_string(v),
                )
            })
            .collect()
    }

    pub fn sum_counter(&self) -> HashMap<TagSet, u64> {
        let mut out: HashMap<TagSet, u64> = HashMap::new();
        self.for_each_match(|key, handle| {
            if let MetricHandle::Counter(_) = handle {
                let v = handle.counter();
                let cur = out.entry(key).or_insert(0);
                *cur = cur.saturating_add(v);
            }
        });
        out
    }

    pub fn sum_counter_total(&self) -> u64 {
        self.sum_counter().values().copied().sum()
    }

    /// `(total, hits)` per group.
    pub fn sum_rate(&self) -> HashMap<TagSet, (u64, u64)> {
        let mut out: HashMap<TagSet, (u64, u64)> = HashMap::new();
        self.for_each_match(|key, handle| {
            if let MetricHandle::Rate(_) = handle {
                let (total, hits) = handle.rate();
                let cur = out.entry(key).or_insert((0, 0));
                cur.0 = cur.0.saturating_add(total);
                cur.1 = cur.1.saturating_add(hits);
            }
        });
        out
    }

    pub fn sum_rate_total(&self) -> (u64, u64) {
        self.sum_rate()
            .values()
            .fold((0, 0), |acc, (t, h)| (acc.0 + t, acc.1 + h))
    }

    pub fn max_gauge(&self) -> Option<i64> {
        let mut out: Option<i64> = None;
        self.for_each_match(|_, handle| {
            if let MetricHandle::Gauge(_) = handle {
                let v = handle.gauge();
                out = Some(out.map_or(v, |cur| cur.max(v)));
            }
        });
        out
    }

    pub fn merge_histogram(&self) -> HashMap<TagSet, HistogramSummary> {
        let scale = self.registry.scale(self.metric);
        let extra = self.registry.extra_percentiles();
        let mut acc: HashMap<TagSet, Histogram<u64>> = HashMap::new();
        self.for_each_match(|key, handle| {
            if let MetricHandle::Histogram(h) = handle {
                let merged = acc.entry(key).or_insert_with(new_default_histogram);
                let _ = merged.add(&*h.lock());
            }
        });

        acc.into_iter()
            .map(|(k, h)| (k, summarize_histogram(&h, scale, &extra)))
            .collect()
    }

    /// Merged summary when the query yields exactly one group.
    pub fn merge_histogram_single(&self) -> Option<HistogramSummary> {
        let mut grouped = self.merge_histogram();
        if grouped.len() != 1 {
            return None;
        }
        grouped.drain().next().map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricKind;

    fn registry_with_requests() -> (Registry, MetricId) {
        let reg = Registry::default();
        let metric = reg
            .register("http_reqs", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));

        let add = |tags: &[(&str, &str)], n: u64| {
            reg.handle(metric, reg.resolve_tags(tags))
                .unwrap_or_else(|| panic!("missing handle"))
                .add(n);
        };
        add(&[], 13);
        add(&[("name", "auth"), ("method", "POST")], 10);
        add(&[("name", "info"), ("method", "GET")], 3);

        (reg, metric)
    }

    #[test]
    fn running_stats_tracks_mean_stdev_max() {
        let mut s = RunningStats::default();
        for x in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            s.push(x);
        }
        assert_eq!(s.count(), 8);
        assert!((s.mean() - 5.0).abs() < 1e-9);
        assert!((s.stdev() - 2.138).abs() < 1e-3);
        assert_eq!(s.max(), 9.0);
        assert!((per_sec(10, 2.0) - 5.0).abs() < 1e-9);
        assert!(per_sec(1, 0.0).is_finite());
    }

    #[test]
    fn sum_counter_filters_and_groups() {
        let (reg, metric) = registry_with_requests();

        assert_eq!(reg.query(metric).untagged().sum_counter_total(), 13);
        assert_eq!(reg.query(metric).where_has("name").sum_counter_total(), 13);
        assert_eq!(
            reg.query(metric).where_eq("name", "auth").sum_counter_total(),
            10
        );
        assert_eq!(
            reg.query(metric).where_eq("name", "never").sum_counter_total(),
            0
        );

        let q = reg.query(metric).where_has("name").group_by(&["method"]);
        let grouped = q.sum_counter();
        assert_eq!(grouped.len(), 2);
        let get = reg.resolve_tags(&[("method", "GET")]);
        assert_eq!(grouped.get(&get), Some(&3));
        assert_eq!(q.describe(&get), vec![("method".to_string(), "GET".to_string())]);
    }

    #[test]
    fn merge_histogram_respects_missing_tag_filter() {
        let reg = Registry::default();
        let metric = reg
            .register("http_req_duration", MetricKind::Histogram)
            .unwrap_or_else(|e| panic!("{e}"));

        let base = reg
            .handle(metric, TagSet::default())
            .unwrap_or_else(|| panic!("missing handle"));
        base.observe(10);
        base.observe(20);
        reg.handle(metric, reg.resolve_tags(&[("name", "buy")]))
            .unwrap_or_else(|| panic!("missing handle"))
            .observe(999);

        let summary = reg
            .query(metric)
            .where_missing("name")
            .merge_histogram_single()
            .unwrap_or_else(|| panic!("expected summary"));
        assert_eq!(summary.count, 2);
        assert!(summary.max.is_some_and(|m| (m - 20.0).abs() < 0.1));

        assert!(reg.query(metric).merge_histogram_single().is_some());
        assert!(
            reg.query(metric)
                .group_by(&["name"])
                .merge_histogram_single()
                .is_none()
        );
    }
}
