use std::sync::Arc;

use crate::context::{SharedContext, Vars};
use crate::error::{Error, Result};
use crate::executor::{Executor, IterationIdentity, IterationReport};
use crate::scenario::Step;

/// Identity used by setup and teardown: VU 0 acting as the first credential,
/// paired with the second one when it exists.
fn hook_identity(executor: &Executor) -> IterationIdentity {
    let identities = &executor.shared().identities;
    let user = (!identities.is_empty()).then_some(0);
    let peer = (identities.len() > 1).then_some(1);
    IterationIdentity {
        vu: 0,
        iter: 0,
        user,
        peer,
    }
}

/// What setup hands to the load phase.
#[derive(Debug, Clone, Default)]
pub struct SetupOutput {
    /// Variables extracted by shared setup steps.
    pub vars: Vars,
    /// Variables extracted by per-user steps, one entry per credential.
    pub user_vars: Vec<Vars>,
}

/// Runs the setup steps once. Any step that is skipped or does not succeed is
/// fatal. Extracted variables become shared variables for the run.
///
/// Shared steps run first. Per-user steps then run once per credential, in
/// credential order, and can read the shared variables.
pub async fn run_setup(executor: &Executor) -> Result<SetupOutput> {
    let (per_user, shared): (Vec<Step>, Vec<Step>) = executor
        .scenario()
        .setup
        .iter()
        .cloned()
        .partition(|s| s.per_user);
    if shared.is_empty() && per_user.is_empty() {
        return Ok(SetupOutput::default());
    }

    let mut output = SetupOutput::default();
    if !shared.is_empty() {
        tracing::info!(steps = shared.len(), "running setup");
        let report = executor.run(&shared, hook_identity(executor)).await;
        ensure_succeeded(&report, None)?;
        output.vars = report.vars;
    }

    if per_user.is_empty() {
        return Ok(output);
    }

    let context = SharedContext {
        vars: output.vars.clone(),
        ..executor.shared().clone()
    };
    let users = context.identities.len();
    let per_user_exec = executor.clone().with_shared(Arc::new(context));

    tracing::info!(steps = per_user.len(), users, "running per-user setup");
    for user in 0..users {
        let ident = IterationIdentity {
            vu: 0,
            iter: user as u64,
            user: Some(user),
            peer: (users > 1).then_some((user + 1) % users),
        };
        let report = per_user_exec.run(&per_user, ident).await;
        let username = per_user_exec
            .shared()
            .identities
            .get(user)
            .map(|c| c.username.as_str());
        ensure_succeeded(&report, username)?;
        output.user_vars.push(report.vars);
    }

    Ok(output)
}

fn ensure_succeeded(report: &IterationReport, user: Option<&str>) -> Result<()> {
    for step in &report.steps {
        tracing::debug!(step = %step.name, user, outcome = ?step.outcome, "setup step finished");
        if !step.outcome.succeeded() {
            let reason = match user {
                Some(user) => format!("user `{user}`: {}", step.outcome.describe()),
                None => step.outcome.describe(),
            };
            return Err(Error::Setup {
                step: step.name.clone(),
                reason,
            });
        }
    }
    Ok(())
}

/// Runs the teardown steps once. Returns a description of the first step that
/// did not succeed; teardown problems never fail the run.
pub async fn run_teardown(executor: &Executor) -> Option<String> {
    let steps = &executor.scenario().teardown;
    if steps.is_empty() {
        return None;
    }

    tracing::info!(steps = steps.len(), "running teardown");
    let report = executor.run(steps, hook_identity(executor)).await;

    let mut first_error = None;
    for step in &report.steps {
        tracing::debug!(step = %step.name, outcome = ?step.outcome, "teardown step finished");
        if !step.outcome.succeeded() && first_error.is_none() {
            first_error = Some(format!("{}: {}", step.name, step.outcome.describe()));
        }
    }

    if let Some(err) = &first_error {
        tracing::warn!(error = %err, "teardown did not complete cleanly");
    }
    first_error
}
