use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;
use serde_json::Value;
use tokio::time::Instant;
use volley_http::{HttpClient, HttpRequest, HttpResponse};

use crate::context::{Scope, SharedContext, Vars};
use crate::metrics::{CheckOutcome, RequestSample, RunMetrics};
use crate::runner::{RateLimiter, Signal};
use crate::scenario::{CheckClass, Scenario, Step};

/// Why a step did not send its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SkipReason {
    /// A template referenced a variable that is not set.
    MissingVar,
    /// A `depends_on` step did not succeed in this iteration.
    Dependency,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Skipped {
        reason: SkipReason,
        detail: String,
    },
    Completed {
        status: Option<u16>,
        class: CheckClass,
        failed: bool,
        /// Transport error message, when there was no response.
        error: Option<String>,
    },
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(
            self,
            StepOutcome::Completed {
                class: CheckClass::Success,
                ..
            }
        )
    }

    /// Short human-readable reason for a non-successful step.
    pub fn describe(&self) -> String {
        match self {
            StepOutcome::Skipped { reason, detail } => format!("skipped ({reason}): {detail}"),
            StepOutcome::Completed {
                error: Some(err), ..
            } => err.clone(),
            StepOutcome::Completed {
                status: Some(status),
                class,
                ..
            } => format!("status {status} ({class})"),
            StepOutcome::Completed { class, .. } => class.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub name: String,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct IterationReport {
    /// Variables extracted during the iteration.
    pub vars: Vars,
    pub steps: Vec<StepReport>,
    /// The stop signal fired while waiting on the limiter before the first
    /// request of the iteration.
    pub interrupted: bool,
}

/// Identity of one iteration: who runs it and as which user.
#[derive(Debug, Clone, Copy, Default)]
pub struct IterationIdentity {
    pub vu: u64,
    pub iter: u64,
    pub user: Option<usize>,
    pub peer: Option<usize>,
}

impl IterationIdentity {
    /// Picks the acting user and a transfer peer for one iteration.
    pub fn pick<R: Rng + ?Sized>(shared: &SharedContext, vu: u64, iter: u64, rng: &mut R) -> Self {
        let user = shared.identities.pick_user(vu, iter, rng);
        let peer = shared.identities.pick_peer(user, rng);
        Self {
            vu,
            iter,
            user,
            peer,
        }
    }
}

/// Runs a sequence of steps for one iteration.
#[derive(Debug, Clone)]
pub struct Executor {
    client: Arc<HttpClient>,
    scenario: Arc<Scenario>,
    shared: Arc<SharedContext>,
    /// Present only when the rate limit is paid per request.
    limiter: Option<Arc<RateLimiter>>,
    /// `None` for setup/teardown, whose requests are not load.
    metrics: Option<Arc<RunMetrics>>,
    stop: Arc<Signal>,
}

impl Executor {
    pub fn new(client: Arc<HttpClient>, scenario: Arc<Scenario>, shared: Arc<SharedContext>) -> Self {
        Self {
            client,
            scenario,
            shared,
            limiter: None,
            metrics: None,
            stop: Arc::new(Signal::new()),
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<RunMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn with_request_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    #[must_use]
    pub fn with_stop(mut self, stop: Arc<Signal>) -> Self {
        self.stop = stop;
        self
    }

    /// Same executor over a different shared context.
    #[must_use]
    pub fn with_shared(mut self, shared: Arc<SharedContext>) -> Self {
        self.shared = shared;
        self
    }

    pub fn shared(&self) -> &SharedContext {
        &self.shared
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub async fn run(&self, steps: &[Step], ident: IterationIdentity) -> IterationReport {
        let mut report = IterationReport::default();
        let mut succeeded: HashSet<&str> = HashSet::new();
        let mut sent_any = false;

        for step in steps {
            let outcome = match self.prepare(step, &report.vars, &succeeded, ident) {
                Err(skip) => skip,
                Ok(req) => {
                    match &self.limiter {
                        // A stop only prevents an iteration from starting; once a
                        // request went out the iteration runs to completion.
                        Some(limiter) if !sent_any => {
                            tokio::select! {
                                biased;
                                _ = self.stop.wait() => {
                                    report.interrupted = true;
                                    break;
                                }
                                _ = limiter.acquire() => {}
                            }
                        }
                        Some(limiter) => limiter.acquire().await,
                        None => {}
                    }
                    sent_any = true;
                    self.send(step, req, &mut report.vars).await
                }
            };

            if let StepOutcome::Skipped { reason, detail } = &outcome {
                tracing::trace!(step = %step.name, %reason, %detail, "step skipped");
                if let Some(metrics) = &self.metrics {
                    metrics.record_skip(&step.name, *reason);
                }
            }
            if outcome.succeeded() {
                succeeded.insert(step.name.as_str());
            }
            report.steps.push(StepReport {
                name: step.name.clone(),
                outcome,
            });
        }

        report
    }

    /// Renders the request, or explains why the step must be skipped.
    fn prepare(
        &self,
        step: &Step,
        locals: &Vars,
        succeeded: &HashSet<&str>,
        ident: IterationIdentity,
    ) -> std::result::Result<HttpRequest, StepOutcome> {
        if let Some(dep) = step
            .depends_on
            .iter()
            .find(|d| !succeeded.contains(d.as_str()))
        {
            return Err(StepOutcome::Skipped {
                reason: SkipReason::Dependency,
                detail: format!("`{dep}` did not succeed"),
            });
        }

        let identities = &self.shared.identities;
        let scope = Scope {
            locals,
            shared: &self.shared,
            vu: ident.vu,
            iter: ident.iter,
            user: ident.user.and_then(|i| identities.get(i)),
            peer: ident.peer.and_then(|i| identities.get(i)),
            user_vars: ident.user.and_then(|i| self.shared.user_vars(i)),
            peer_vars: ident.peer.and_then(|i| self.shared.user_vars(i)),
        };
        let missing = |e: crate::scenario::MissingVar| StepOutcome::Skipped {
            reason: SkipReason::MissingVar,
            detail: e.to_string(),
        };

        let url = self.scenario.resolve_url(&step.url.render(&scope).map_err(missing)?);
        let mut req = HttpRequest::new(step.method.clone(), url).with_timeout(step.timeout);

        for (name, value) in &step.headers {
            req = req.with_header(name.clone(), value.render(&scope).map_err(missing)?);
        }

        if let Some(body) = &step.body {
            let body = body.render(&scope).map_err(missing)?;
            if !req
                .headers
                .iter()
                .any(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            {
                req = req.with_header("content-type", "application/json");
            }
            req = req.with_body(Bytes::from(body.to_string()));
        }

        Ok(req)
    }

    async fn send(&self, step: &Step, req: HttpRequest, vars: &mut Vars) -> StepOutcome {
        let method = req.method.clone();
        let at = Instant::now();
        let result = self.client.request(req).await;
        let latency = at.elapsed();

        let (outcome, sample_status, error_kind, bytes) = match result {
            Ok(res) => {
                let json = parse_json_if(step.needs_json(), &res);
                let class = step.check.classify(res.status, &res.body, json.as_ref());
                if class == CheckClass::Success {
                    extract_vars(step, &res, json.as_ref(), vars);
                }
                let failed = !step.check.expects(res.status);
                (
                    StepOutcome::Completed {
                        status: Some(res.status),
                        class,
                        failed,
                        error: None,
                    },
                    Some(res.status),
                    None,
                    (res.bytes_sent, res.bytes_received),
                )
            }
            Err(err) => {
                tracing::debug!(step = %step.name, error = %err, "request failed");
                (
                    StepOutcome::Completed {
                        status: None,
                        class: CheckClass::Failure,
                        failed: true,
                        error: Some(err.to_string()),
                    },
                    None,
                    Some(err.transport_error_kind()),
                    (0, 0),
                )
            }
        };

        if let (Some(metrics), StepOutcome::Completed { class, failed, .. }) = (&self.metrics, &outcome)
        {
            metrics.record_request(&RequestSample {
                name: &step.name,
                method,
                latency,
                status: sample_status,
                error_kind,
                failed: *failed,
                bytes_sent: bytes.0,
                bytes_received: bytes.1,
                at,
            });
            metrics.record_check(&CheckOutcome {
                label: &step.check.name,
                passed: class.passed(),
                class: *class,
                at,
            });
        }

        outcome
    }
}

fn parse_json_if(needed: bool, res: &HttpResponse) -> Option<Value> {
    if !needed {
        return None;
    }
    serde_json::from_slice(&res.body).ok()
}

fn extract_vars(step: &Step, res: &HttpResponse, json: Option<&Value>, vars: &mut Vars) {
    for rule in &step.extract {
        match rule.apply(res, json) {
            Some(v) => {
                vars.insert(rule.var.clone(), v);
            }
            None => {
                tracing::trace!(step = %step.name, var = %rule.var, "extraction found nothing");
            }
        }
    }
}
