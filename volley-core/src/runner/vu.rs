use std::sync::Arc;
use std::time::Duration;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::time::Instant;

use super::gate::IterationGate;
use super::limiter::RateLimiter;
use super::signal::Signal;
use crate::executor::{Executor, IterationIdentity};
use crate::metrics::RunMetrics;

#[derive(Debug, Clone)]
pub(crate) struct VuContext {
    /// 1-based.
    pub vu: u64,
    pub executor: Executor,
    pub gate: Arc<IterationGate>,
    /// Present only when the rate limit is paid per iteration.
    pub iteration_limiter: Option<Arc<RateLimiter>>,
    pub metrics: Arc<RunMetrics>,
    pub think_time: Duration,
    pub start: Arc<Signal>,
}

/// One virtual user: gate check, limiter wait, iteration, think time, repeat.
pub(crate) async fn run_vu(ctx: VuContext) {
    ctx.start.wait().await;

    let _active = ctx.metrics.vu_started();
    let mut rng = StdRng::from_entropy();
    let steps = &ctx.executor.scenario().steps;
    let mut iter: u64 = 0;

    while ctx.gate.next() {
        if let Some(limiter) = &ctx.iteration_limiter {
            tokio::select! {
                biased;
                _ = ctx.gate.stopped() => break,
                _ = limiter.acquire() => {}
            }
        }

        let ident = IterationIdentity::pick(ctx.executor.shared(), ctx.vu, iter, &mut rng);
        let started = Instant::now();
        let report = ctx.executor.run(steps, ident).await;
        if report.interrupted {
            break;
        }
        ctx.metrics.record_iteration(started.elapsed());
        iter = iter.saturating_add(1);

        if !ctx.think_time.is_zero() {
            tokio::select! {
                biased;
                _ = ctx.gate.stopped() => break,
                _ = tokio::time::sleep(ctx.think_time) => {}
            }
        }
    }

    tracing::trace!(vu = ctx.vu, iterations = iter, "vu finished");
}
