use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MetricKind {
    Counter,
    Gauge,
    Rate,
    Histogram,
}

/// Extra tail points reported on top of the whole-number percentiles 1..=100.
pub const PERCENTILE_TABLE: [f64; 2] = [99.9, 99.99];

#[derive(Debug, Clone)]
pub struct MetricSeriesSummary {
    pub name: String,
    pub kind: MetricKind,
    pub tags: Vec<(String, String)>,
    pub values: MetricValue,
}

impl MetricSeriesSummary {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum MetricValue {
    Counter(u64),
    Gauge(i64),
    Rate {
        total: u64,
        hits: u64,
        rate: Option<f64>,
    },
    Histogram(HistogramSummary),
}

#[derive(Debug, Clone, Default)]
pub struct HistogramSummary {
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
    /// `(percentile, value)` pairs for 1..=100, the tail points in [`PERCENTILE_TABLE`]
    /// and any extra points the registry was asked to track.
    pub percentiles: Vec<(f64, f64)>,
}

impl HistogramSummary {
    /// Value at one of the tabulated percentiles. Untabulated points return `None`.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|(q, _)| (q - p).abs() < 1e-9)
            .map(|(_, v)| *v)
    }
}

pub(crate) fn new_default_histogram() -> Histogram<u64> {
    // Microsecond resolution, 1us..1h, 3 significant digits.
    match Histogram::<u64>::new_with_bounds(1, 3_600_000_000, 3) {
        Ok(h) => h,
        Err(err) => panic!("failed to create histogram: {err}"),
    }
}

/// True when `p` is always present in [`HistogramSummary::percentiles`].
pub fn is_tabulated_percentile(p: f64) -> bool {
    (p.fract() == 0.0 && (1.0..=100.0).contains(&p))
        || PERCENTILE_TABLE.iter().any(|q| (q - p).abs() < 1e-9)
}

/// Summarizes a histogram, dividing every reported value by `scale`
/// (e.g. `1000.0` to report microsecond samples in milliseconds). `extra`
/// adds percentile points beyond the fixed table.
pub(crate) fn summarize_histogram(h: &Histogram<u64>, scale: f64, extra: &[f64]) -> HistogramSummary {
    let count = h.len();
    if count == 0 {
        return HistogramSummary::default();
    }

    let scale = if scale > 0.0 { scale } else { 1.0 };
    let at = |p: f64| h.value_at_percentile(p) as f64 / scale;

    let percentiles = (1..=100u32)
        .map(f64::from)
        .chain(PERCENTILE_TABLE)
        .chain(extra.iter().copied())
        .map(|p| (p, at(p)))
        .collect();

    HistogramSummary {
        p50: Some(at(50.0)),
        p75: Some(at(75.0)),
        p90: Some(at(90.0)),
        p95: Some(at(95.0)),
        p99: Some(at(99.0)),
        min: Some(h.min() as f64 / scale),
        max: Some(h.max() as f64 / scale),
        mean: Some(h.mean() / scale),
        stdev: Some(h.stdev() / scale),
        count,
        percentiles,
    }
}

#[derive(Debug, Default)]
pub struct Rate {
    pub total: AtomicU64,
    pub hits: AtomicU64,
}

impl Rate {
    pub(crate) fn snapshot(&self) -> MetricValue {
        let total = self.total.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        MetricValue::Rate {
            total,
            hits,
            rate: (total > 0).then(|| hits as f64 / total as f64),
        }
    }
}

/// Shared storage behind one series. Cloning shares the underlying cell.
#[derive(Debug, Clone)]
pub enum MetricHandle {
    Counter(Arc<AtomicU64>),
    Gauge(Arc<AtomicI64>),
    Rate(Arc<Rate>),
    Histogram(Arc<Mutex<Histogram<u64>>>),
}

impl MetricHandle {
    /// A fresh cell. Handles created outside a [`crate::Registry`] are never summarized.
    pub fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Arc::new(AtomicU64::new(0))),
            MetricKind::Gauge => Self::Gauge(Arc::new(AtomicI64::new(0))),
            MetricKind::Rate => Self::Rate(Arc::new(Rate::default())),
            MetricKind::Histogram => Self::Histogram(Arc::new(Mutex::new(new_default_histogram()))),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Counter(_) => MetricKind::Counter,
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Rate(_) => MetricKind::Rate,
            Self::Histogram(_) => MetricKind::Histogram,
        }
    }

    #[inline]
    pub fn add(&self, value: u64) {
        if let Self::Counter(c) = self {
            c.fetch_add(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn set(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.store(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn add_gauge(&self, delta: i64) -> i64 {
        match self {
            Self::Gauge(g) => g.fetch_add(delta, Ordering::Relaxed) + delta,
            _ => 0,
        }
    }

    /// Raises a gauge to `value` if it is currently lower.
    #[inline]
    pub fn raise_to(&self, value: i64) {
        if let Self::Gauge(g) = self {
            g.fetch_max(value, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn hit(&self, hit: bool) {
        if let Self::Rate(r) = self {
            r.total.fetch_add(1, Ordering::Relaxed);
            if hit {
                r.hits.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[inline]
    pub fn observe(&self, value: u64) {
        if let Self::Histogram(h) = self {
            let _ = h.lock().record(value.max(1));
        }
    }

    pub fn counter(&self) -> u64 {
        match self {
            Self::Counter(c) => c.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    pub fn gauge(&self) -> i64 {
        match self {
            Self::Gauge(g) => g.load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// `(total, hits)` for a rate series.
    pub fn rate(&self) -> (u64, u64) {
        match self {
            Self::Rate(r) => (
                r.total.load(Ordering::Relaxed),
                r.hits.load(Ordering::Relaxed),
            ),
            _ => (0, 0),
        }
    }

    pub(crate) fn snapshot(&self, scale: f64, extra: &[f64]) -> MetricValue {
        match self {
            Self::Counter(c) => MetricValue::Counter(c.load(Ordering::Relaxed)),
            Self::Gauge(g) => MetricValue::Gauge(g.load(Ordering::Relaxed)),
            Self::Rate(r) => r.snapshot(),
            Self::Histogram(h) => MetricValue::Histogram(summarize_histogram(&h.lock(), scale, extra)),
        }
    }
}
