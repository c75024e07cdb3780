#![forbid(unsafe_code)]

mod config;
mod context;
mod credentials;
mod error;
mod executor;
mod hooks;
mod identities;
mod metrics;
mod summary;
mod thresholds;
mod thresholds_eval;

pub mod runner;
pub mod scenario;

pub use config::{
    DEFAULT_GRACEFUL_STOP, DEFAULT_REQUEST_TIMEOUT, DEFAULT_THINK_TIME, LimiterScope, PlanOptions,
    RateLimit, RunConfig, RunOverrides,
};
pub use context::{EnvVars, Scope, SharedContext, Vars, env_vars, process_env_snapshot};
pub use credentials::{Credential, load_credentials, parse_credentials};
pub use error::{Error, Result};
pub use executor::{
    Executor, IterationIdentity, IterationReport, SkipReason, StepOutcome, StepReport,
};
pub use hooks::{SetupOutput, run_setup, run_teardown};
pub use identities::{Identities, UserSelection};
pub use metrics::{ActiveVuGuard, CheckOutcome, RequestSample, RunMetrics};
pub use summary::{CheckSummary, EndpointSummary, ErrorSummary, MetricsSummary, SkipSummary};
pub use thresholds::{
    ThresholdAgg, ThresholdExpr, ThresholdOp, ThresholdSet, parse_threshold_expr,
};
pub use thresholds_eval::{ThresholdResult, Verdict, evaluate};

pub use volley_http::HttpClient;
pub use volley_metrics::{HistogramSummary, MetricSeriesSummary, MetricValue};
