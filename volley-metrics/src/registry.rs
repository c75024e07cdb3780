use dashmap::DashMap;
use parking_lot::RwLock;

use crate::key::{Interner, KeyId};
use crate::metrics::{MetricHandle, MetricKind, MetricSeriesSummary, is_tabulated_percentile};
use crate::query::Query;
use crate::tags::TagSet;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("metric `{name}` is already registered as {existing}, not {requested}")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetricId(u32);

#[derive(Debug)]
struct MetricDef {
    name: KeyId,
    kind: MetricKind,
    /// Divisor applied to histogram values when summarizing.
    scale: f64,
}

#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    defs: RwLock<Vec<MetricDef>>,
    series: DashMap<MetricId, DashMap<TagSet, MetricHandle>>,
    /// Histogram percentiles summarized on top of the fixed table.
    extra_percentiles: RwLock<Vec<f64>>,
}

impl Registry {
    pub fn register(&self, name: &str, kind: MetricKind) -> Result<MetricId> {
        self.register_scaled(name, kind, 1.0)
    }

    /// Registers a metric whose histogram values are divided by `scale` in summaries.
    pub fn register_scaled(&self, name: &str, kind: MetricKind, scale: f64) -> Result<MetricId> {
        let name_id = self.interner.get_or_intern(name);

        let mut defs = self.defs.write();
        if let Some((idx, def)) = defs.iter().enumerate().find(|(_, d)| d.name == name_id) {
            if def.kind != kind {
                return Err(Error::KindMismatch {
                    name: name.to_string(),
                    existing: def.kind,
                    requested: kind,
                });
            }
            return Ok(MetricId(idx as u32));
        }

        let id = MetricId(defs.len() as u32);
        defs.push(MetricDef {
            name: name_id,
            kind,
            scale,
        });
        self.series.insert(id, DashMap::new());
        Ok(id)
    }

    /// Makes every histogram summary report percentile `p` as well. Points the
    /// fixed table already covers, and values outside (0, 100], are ignored.
    pub fn track_percentile(&self, p: f64) {
        if !(p > 0.0 && p <= 100.0) || is_tabulated_percentile(p) {
            return;
        }
        let mut extra = self.extra_percentiles.write();
        if !extra.iter().any(|q| (q - p).abs() < 1e-9) {
            extra.push(p);
        }
    }

    pub(crate) fn extra_percentiles(&self) -> Vec<f64> {
        self.extra_percentiles.read().clone()
    }

    pub fn lookup(&self, name: &str) -> Option<MetricId> {
        let name_id = self.interner.get(name)?;
        let defs = self.defs.read();
        defs.iter()
            .position(|d| d.name == name_id)
            .map(|idx| MetricId(idx as u32))
    }

    pub fn kind(&self, metric: MetricId) -> Option<MetricKind> {
        self.defs.read().get(metric.0 as usize).map(|d| d.kind)
    }

    pub fn resolve_key(&self, key: &str) -> KeyId {
        self.interner.get_or_intern(key)
    }

    pub fn lookup_key(&self, key: &str) -> Option<KeyId> {
        self.interner.get(key)
    }

    pub fn resolve_string(&self, id: KeyId) -> String {
        self.interner.resolve_string(id)
    }

    pub fn resolve_tags(&self, tags: &[(&str, &str)]) -> TagSet {
        TagSet::from_pairs(
            tags.iter()
                .map(|(k, v)| (self.resolve_key(k), self.resolve_key(v))),
        )
    }

    /// Returns the handle for one series, creating it on first use.
    pub fn handle(&self, metric: MetricId, tags: TagSet) -> Option<MetricHandle> {
        let kind = self.kind(metric)?;
        let series = self.series.get(&metric)?;
        if let Some(existing) = series.get(&tags) {
            return Some(existing.value().clone());
        }

        let handle = series
            .entry(tags)
            .or_insert_with(|| MetricHandle::new(kind))
            .value()
            .clone();
        Some(handle)
    }

    pub(crate) fn visit_series(&self, metric: MetricId, mut f: impl FnMut(&TagSet, &MetricHandle)) {
        let Some(series) = self.series.get(&metric) else {
            return;
        };
        for entry in series.iter() {
            f(entry.key(), entry.value());
        }
    }

    pub fn query(&self, metric: MetricId) -> Query<'_> {
        Query::new(self, metric)
    }

    pub(crate) fn scale(&self, metric: MetricId) -> f64 {
        self.defs
            .read()
            .get(metric.0 as usize)
            .map(|d| d.scale)
            .unwrap_or(1.0)
    }

    /// Snapshot of every series, sorted by metric name and then tags.
    pub fn summarize(&self) -> Vec<MetricSeriesSummary> {
        let defs = self.defs.read();
        let extra = self.extra_percentiles();
        let mut out = Vec::new();

        for (idx, def) in defs.iter().enumerate() {
            let Some(series) = self.series.get(&MetricId(idx as u32)) else {
                continue;
            };
            let name = self.interner.resolve_string(def.name);

            for entry in series.iter() {
                let tags = entry
                    .key()
                    .iter()
                    .map(|(k, v)| {
                        (
                            self.interner.resolve_string(k),
                            self.interner.resolve_string(v),
                        )
                    })
                    .collect();

                out.push(MetricSeriesSummary {
                    name: name.clone(),
                    kind: def.kind,
                    tags,
                    values: entry.value().snapshot(def.scale, &extra),
                });
            }
        }

        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricValue;

    #[test]
    fn register_is_idempotent_and_rejects_kind_change() {
        let reg = Registry::default();
        let a = reg
            .register("http_reqs", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        let b = reg
            .register("http_reqs", MetricKind::Counter)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(a, b);
        assert_eq!(reg.lookup("http_reqs"), Some(a));
        assert_eq!(reg.lookup("nope"), None);

        assert!(matches!(
            reg.register("http_reqs", MetricKind::Rate),
            Err(Error::KindMismatch { .. })
        ));
    }

    #[test]
    fn handles_share_storage_per_series() {
        let reg = Registry::default();
        let id = reg
            .register("checks", MetricKind::Rate)
            .unwrap_or_else(|e| panic!("{e}"));

        let tags = reg.resolve_tags(&[("name", "auth")]);
        let h1 = reg
            .handle(id, tags.clone())
            .unwrap_or_else(|| panic!("missing handle"));
        let h2 = reg
            .handle(id, tags)
            .unwrap_or_else(|| panic!("missing handle"));
        h1.hit(true);
        h2.hit(false);
        assert_eq!(h1.rate(), (2, 1));
    }

    #[test]
    fn summarize_resolves_names_tags_and_scale() {
        let reg = Registry::default();
        let id = reg
            .register_scaled("http_req_duration", MetricKind::Histogram, 1000.0)
            .unwrap_or_else(|e| panic!("{e}"));
        let base = reg
            .handle(id, TagSet::default())
            .unwrap_or_else(|| panic!("missing handle"));
        base.observe(2_000);
        let tagged = reg
            .handle(id, reg.resolve_tags(&[("name", "info")]))
            .unwrap_or_else(|| panic!("missing handle"));
        tagged.observe(4_000);

        let series = reg.summarize();
        assert_eq!(series.len(), 2);
        assert!(series[0].tags.is_empty());
        assert_eq!(series[1].tag("name"), Some("info"));

        let MetricValue::Histogram(h) = &series[0].values else {
            panic!("expected histogram");
        };
        assert_eq!(h.min, Some(2.0));
    }

    #[test]
    fn tracked_percentiles_appear_in_summaries() {
        let reg = Registry::default();
        let id = reg
            .register_scaled("http_req_duration", MetricKind::Histogram, 1000.0)
            .unwrap_or_else(|e| panic!("{e}"));
        reg.track_percentile(97.5);
        reg.track_percentile(97.5);
        reg.track_percentile(95.0);
        assert_eq!(reg.extra_percentiles(), vec![97.5]);

        let base = reg
            .handle(id, TagSet::default())
            .unwrap_or_else(|| panic!("missing handle"));
        for _ in 0..100 {
            base.observe(5_000);
        }

        let series = reg.summarize();
        let MetricValue::Histogram(h) = &series[0].values else {
            panic!("expected histogram");
        };
        assert!(h.percentile(97.5).is_some_and(|v| (v - 5.0).abs() < 0.01));
    }
}
