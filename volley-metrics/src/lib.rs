#![forbid(unsafe_code)]

pub mod key;
pub mod metrics;
pub mod query;
pub mod registry;
pub mod tags;

pub use key::KeyId;
pub use metrics::{
    HistogramSummary, MetricHandle, MetricKind, MetricSeriesSummary, MetricValue,
    PERCENTILE_TABLE, is_tabulated_percentile,
};
pub use query::{Query, RunningStats, per_sec};
pub use registry::{Error, MetricId, Registry};
pub use tags::TagSet;
