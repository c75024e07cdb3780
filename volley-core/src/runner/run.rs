use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use volley_http::HttpClient;

use super::gate::IterationGate;
use super::limiter::RateLimiter;
use super::progress::{ProgressFn, ProgressSource, spawn_progress};
use super::signal::Signal;
use super::vu::{VuContext, run_vu};
use crate::config::{LimiterScope, RunConfig};
use crate::context::{EnvVars, SharedContext, Vars};
use crate::credentials::Credential;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::hooks::{run_setup, run_teardown};
use crate::identities::Identities;
use crate::metrics::RunMetrics;
use crate::scenario::Scenario;
use crate::summary::MetricsSummary;
use crate::thresholds_eval::{Verdict, evaluate};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything needed to execute one run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub config: RunConfig,
    pub scenario: Scenario,
    pub credentials: Vec<Credential>,
    pub env: EnvVars,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: MetricsSummary,
    pub verdict: Verdict,
    /// VUs still running after the graceful-stop period, which were aborted.
    pub interrupted_vus: u64,
    /// The operator requested a stop before the run ended on its own.
    pub aborted: bool,
    pub teardown_error: Option<String>,
}

/// Setup, load, drain, summary, verdict, teardown.
///
/// Firing `abort` stops the load early; in-flight iterations still drain. A
/// setup failure returns [`Error::Setup`] before any VU is spawned.
pub async fn run(plan: RunPlan, abort: Arc<Signal>, progress: Option<ProgressFn>) -> Result<RunReport> {
    let RunPlan {
        config,
        scenario,
        credentials,
        env,
    } = plan;
    scenario.validate()?;

    let client = Arc::new(HttpClient::new(Some(CONNECT_TIMEOUT), Some(config.timeout)));
    let scenario = Arc::new(scenario);
    let mut shared = SharedContext {
        vars: Vars::new(),
        user_vars: Vec::new(),
        identities: Identities::new(credentials, config.user_selection, config.exclude_self),
        env,
    };

    let setup_exec = Executor::new(client.clone(), scenario.clone(), Arc::new(shared.clone()));
    let setup = tokio::select! {
        biased;
        _ = abort.wait() => return Err(Error::Aborted),
        output = run_setup(&setup_exec) => output?,
    };
    shared.vars = setup.vars;
    shared.user_vars = setup.user_vars;
    let shared = Arc::new(shared);

    let metrics = Arc::new(RunMetrics::new()?);
    metrics.track_thresholds(&config.thresholds);
    let stop = Arc::new(Signal::new());
    let start = Arc::new(Signal::new());
    let gate = Arc::new(IterationGate::new(
        config.iterations,
        config.duration,
        stop.clone(),
    ));

    let mut executor = Executor::new(client.clone(), scenario.clone(), shared.clone())
        .with_metrics(metrics.clone())
        .with_stop(stop.clone());
    let mut iteration_limiter = None;
    if let Some(rate) = config.rate {
        let limiter = Arc::new(RateLimiter::new(rate.rps, rate.burst));
        match rate.scope {
            LimiterScope::Iteration => iteration_limiter = Some(limiter),
            LimiterScope::Request => executor = executor.with_request_limiter(limiter),
        }
    }

    // Every VU parks on `start` so spawn cost stays out of the measured run.
    let mut set = JoinSet::new();
    for vu in 1..=config.vus {
        set.spawn(run_vu(VuContext {
            vu,
            executor: executor.clone(),
            gate: gate.clone(),
            iteration_limiter: iteration_limiter.clone(),
            metrics: metrics.clone(),
            think_time: config.think_time,
            start: start.clone(),
        }));
    }

    tracing::info!(
        vus = config.vus,
        duration = ?config.duration,
        iterations = ?config.iterations,
        rps = ?config.rate.map(|r| r.rps),
        "starting load"
    );

    let started = Instant::now();
    gate.start_at(started);
    start.fire();

    let progress_task = progress.map(|progress| {
        spawn_progress(
            ProgressSource {
                metrics: metrics.clone(),
                thresholds: config.thresholds.clone(),
                started,
                duration: config.duration,
                vus: config.vus,
            },
            progress,
        )
    });

    let mut aborted = false;
    let deadline = gate.deadline();
    loop {
        tokio::select! {
            joined = set.join_next() => match joined {
                None => break,
                Some(res) => check_join(res)?,
            },
            _ = abort.wait() => {
                tracing::info!("stop requested; draining in-flight iterations");
                aborted = true;
                stop.fire();
                break;
            }
            _ = sleep_until(deadline) => {
                stop.fire();
                break;
            }
        }
    }

    let mut interrupted_vus: u64 = 0;
    if !set.is_empty() {
        let drained = tokio::time::timeout(config.graceful_stop, async {
            while let Some(res) = set.join_next().await {
                check_join(res)?;
            }
            Ok::<(), Error>(())
        })
        .await;

        match drained {
            Ok(res) => res?,
            Err(_) => {
                interrupted_vus = set.len() as u64;
                tracing::warn!(
                    interrupted_vus,
                    graceful_stop = ?config.graceful_stop,
                    "VUs still running after graceful stop; aborting them"
                );
                set.abort_all();
                while set.join_next().await.is_some() {}
            }
        }
    }

    let elapsed = started.elapsed();
    drop(progress_task);

    let summary = metrics.snapshot(elapsed);
    let verdict = evaluate(&config.thresholds, &summary);
    tracing::info!(
        elapsed = ?elapsed,
        requests = summary.requests_total,
        iterations = summary.iterations,
        passed = verdict.passed,
        "load finished"
    );

    let teardown_exec = Executor::new(client, scenario, shared);
    let teardown_error = run_teardown(&teardown_exec).await;

    Ok(RunReport {
        summary,
        verdict,
        interrupted_vus,
        aborted,
        teardown_error,
    })
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn check_join(res: std::result::Result<(), JoinError>) -> Result<()> {
    match res {
        Ok(()) => Ok(()),
        Err(err) if err.is_cancelled() => Ok(()),
        Err(err) => Err(Error::Join(err)),
    }
}
