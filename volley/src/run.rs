use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use volley_core::runner::{RunPlan, Signal};
use volley_core::scenario::Scenario;
use volley_core::{Credential, EnvVars, RunConfig, RunOverrides, env_vars, load_credentials};

use crate::cli::{RunArgs, ValidateArgs};
use crate::exit_codes::ExitCode;
use crate::output::{self, RunHeader};
use crate::plan_yaml::{LoadedPlan, load_plan};
use crate::run_error::RunError;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let LoadedPlan {
        name,
        options,
        mut scenario,
        credentials,
    } = load_plan(&args.plan).await.map_err(RunError::InvalidInput)?;

    override_base_url(&mut scenario, args.base_url.as_deref()).map_err(RunError::InvalidInput)?;
    scenario
        .validate()
        .map_err(|e| RunError::from_core(e, "invalid plan"))?;

    let env = merged_env(&args.env).map_err(RunError::InvalidInput)?;
    let config = RunConfig::resolve(
        options,
        RunOverrides {
            vus: args.vus,
            duration: args.duration,
            iterations: args.iterations,
            rps: args.rps,
            think_time: args.think_time,
        },
    )
    .map_err(|e| RunError::from_core(e, "invalid run options"))?;

    let credentials = read_credentials(args.credentials.as_deref().or(credentials.as_deref())).await?;

    out.print_header(&RunHeader {
        plan: &args.plan,
        name: name.as_deref(),
        config: &config,
        users: credentials.len(),
    });

    let abort = Arc::new(Signal::new());
    spawn_ctrl_c(abort.clone());

    let report = volley_core::runner::run(
        RunPlan {
            config,
            scenario,
            credentials,
            env,
        },
        abort,
        out.progress(),
    )
    .await
    .map_err(|e| RunError::from_core(e, "run failed"))?;

    out.print_summary(&report).map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_verdict(report.verdict.passed, report.aborted))
}

pub async fn validate(args: ValidateArgs) -> Result<(), RunError> {
    let LoadedPlan {
        name,
        options,
        mut scenario,
        credentials,
    } = load_plan(&args.plan).await.map_err(RunError::InvalidInput)?;

    override_base_url(&mut scenario, args.base_url.as_deref()).map_err(RunError::InvalidInput)?;
    scenario
        .validate()
        .map_err(|e| RunError::from_core(e, "invalid plan"))?;

    let thresholds = options.thresholds.len();
    RunConfig::resolve(options, RunOverrides::default())
        .map_err(|e| RunError::from_core(e, "invalid run options"))?;
    let users = read_credentials(credentials.as_deref()).await?.len();

    println!(
        "plan ok: {} (setup={} steps={} teardown={} thresholds={thresholds} users={users})",
        name.as_deref().unwrap_or_else(|| args.plan.to_str().unwrap_or("plan")),
        scenario.setup.len(),
        scenario.steps.len(),
        scenario.teardown.len(),
    );
    Ok(())
}

fn override_base_url(scenario: &mut Scenario, raw: Option<&str>) -> anyhow::Result<()> {
    if let Some(raw) = raw {
        let url = url::Url::parse(raw).with_context(|| format!("invalid --base-url '{raw}'"))?;
        scenario.base_url = Some(url);
    }
    Ok(())
}

async fn read_credentials(path: Option<&Path>) -> Result<Vec<Credential>, RunError> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let creds = load_credentials(path)
        .await
        .map_err(|e| RunError::from_core(e, "failed to load credentials"))?;
    tracing::debug!(path = %path.display(), users = creds.len(), "credentials loaded");
    Ok(creds)
}

/// First Ctrl-C drains the run; a second one exits immediately.
fn spawn_ctrl_c(abort: Arc<Signal>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("stopping: waiting for in-flight iterations (Ctrl-C again to exit now)");
        abort.fire();

        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(ExitCode::Aborted.as_i32());
        }
    });
}

pub(crate) fn merged_env(overrides: &[String]) -> anyhow::Result<EnvVars> {
    let mut pairs: Vec<(String, String)> = std::env::vars().collect();
    for raw in overrides {
        pairs.push(parse_env_override(raw)?);
    }
    Ok(env_vars(pairs))
}

fn parse_env_override(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .with_context(|| format!("invalid --env (expected KEY=VALUE): {s}"))?;
    if k.is_empty() {
        anyhow::bail!("invalid --env (empty KEY): {s}");
    }
    Ok((k.to_string(), v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_win_over_process_env() {
        let env = merged_env(&["VOLLEY_TEST_ONLY_KEY=one".to_string(), "VOLLEY_TEST_ONLY_KEY=two".to_string()])
            .unwrap_or_else(|e| panic!("{e}"));
        let value = env
            .iter()
            .find(|(k, _)| k.as_ref() == "VOLLEY_TEST_ONLY_KEY")
            .map(|(_, v)| v.as_ref());
        assert_eq!(value, Some("two"));
    }

    #[test]
    fn env_override_requires_key_and_equals() {
        assert!(parse_env_override("NOVALUE").is_err());
        assert!(parse_env_override("=x").is_err());
        assert_eq!(
            parse_env_override("EMPTY=").unwrap_or_else(|e| panic!("{e}")),
            ("EMPTY".to_string(), String::new())
        );
    }

    #[test]
    fn base_url_override_replaces_plan_value() {
        let mut scenario = Scenario::default();
        override_base_url(&mut scenario, Some("http://127.0.0.1:9/")).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            scenario.base_url.as_ref().map(url::Url::as_str),
            Some("http://127.0.0.1:9/")
        );
        assert!(override_base_url(&mut scenario, Some("not a url")).is_err());
    }
}
