use std::time::Duration;

use crate::error::{Error, Result};
use crate::identities::UserSelection;
use crate::thresholds::ThresholdSet;

pub const DEFAULT_THINK_TIME: Duration = Duration::from_secs(1);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// What a rate-limiter token pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LimiterScope {
    /// One token per iteration, taken before the first step.
    #[default]
    Iteration,
    /// One token per HTTP request.
    Request,
}

/// Run options as written in a plan file. Every field is optional.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub vus: Option<u64>,
    pub duration: Option<Duration>,
    pub iterations: Option<u64>,
    pub rps: Option<u64>,
    pub burst: Option<u64>,
    pub limiter: Option<LimiterScope>,
    pub think_time: Option<Duration>,
    pub graceful_stop: Option<Duration>,
    pub timeout: Option<Duration>,
    pub user_selection: Option<UserSelection>,
    pub exclude_self: Option<bool>,
    pub thresholds: Vec<ThresholdSet>,
}

/// Command-line overrides. Set fields win over the plan file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub vus: Option<u64>,
    pub duration: Option<Duration>,
    pub iterations: Option<u64>,
    pub rps: Option<u64>,
    pub think_time: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub rps: u64,
    pub burst: u64,
    pub scope: LimiterScope,
}

/// Validated, immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub vus: u64,
    pub duration: Option<Duration>,
    pub iterations: Option<u64>,
    pub rate: Option<RateLimit>,
    pub think_time: Duration,
    pub graceful_stop: Duration,
    pub timeout: Duration,
    pub user_selection: UserSelection,
    pub exclude_self: bool,
    pub thresholds: Vec<ThresholdSet>,
}

impl RunConfig {
    pub fn resolve(opts: PlanOptions, cli: RunOverrides) -> Result<Self> {
        let vus = cli.vus.or(opts.vus).unwrap_or(1);
        if vus == 0 {
            return Err(Error::InvalidVus);
        }

        let duration = cli.duration.or(opts.duration);
        if duration.is_some_and(|d| d.is_zero()) {
            return Err(Error::InvalidDuration);
        }

        // Default iterations is 1 unless duration mode is used.
        let iterations = cli
            .iterations
            .or(opts.iterations)
            .or_else(|| if duration.is_some() { None } else { Some(1) });
        if iterations == Some(0) {
            return Err(Error::InvalidIterations);
        }

        let rate = match cli.rps.or(opts.rps) {
            None => None,
            Some(0) => return Err(Error::InvalidRate),
            Some(rps) => {
                let burst = opts.burst.unwrap_or(1);
                if burst == 0 {
                    return Err(Error::InvalidBurst);
                }
                Some(RateLimit {
                    rps,
                    burst,
                    scope: opts.limiter.unwrap_or_default(),
                })
            }
        };

        Ok(Self {
            vus,
            duration,
            iterations,
            rate,
            think_time: cli
                .think_time
                .or(opts.think_time)
                .unwrap_or(DEFAULT_THINK_TIME),
            graceful_stop: opts.graceful_stop.unwrap_or(DEFAULT_GRACEFUL_STOP),
            timeout: opts
                .timeout
                .filter(|t| !t.is_zero())
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            user_selection: opts.user_selection.unwrap_or_default(),
            exclude_self: opts.exclude_self.unwrap_or(true),
            thresholds: opts.thresholds,
        })
    }
}
