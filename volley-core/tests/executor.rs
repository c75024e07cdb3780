use std::sync::Arc;

use serde_json::json;
use volley_core::scenario::{Check, CheckClass, Extract, Scenario, Step};
use volley_core::{
    Credential, Executor, HttpClient, Identities, IterationIdentity, SharedContext, SkipReason,
    StepOutcome, UserSelection,
};
use volley_testserver::{ShopConfig, TestServer};

fn shared(users: &[(&str, &str)]) -> Arc<SharedContext> {
    let creds = users
        .iter()
        .map(|(u, p)| Credential {
            username: u.to_string(),
            password: p.to_string(),
        })
        .collect();
    Arc::new(SharedContext {
        identities: Identities::new(creds, UserSelection::RoundRobin, true),
        ..SharedContext::default()
    })
}

fn transfer_scenario(base: &str) -> anyhow::Result<Scenario> {
    let auth = Step::new("auth", http::Method::POST, "/api/auth")?
        .with_json_body(&json!({
            "username": "${user.username}",
            "password": "${user.password}",
        }))?
        .with_check(Check::new("auth ok"))
        .with_extract(Extract::json("token", "token"));

    let mut send_check = Check::new("send ok");
    send_check.rejection.push_pattern("400")?;
    let send = Step::new("send", http::Method::POST, "/api/sendCoin")?
        .with_header("authorization", "Bearer ${token}")?
        .with_json_body(&json!({ "toUser": "${peer.username}", "amount": 5 }))?
        .with_check(send_check)
        .depends_on("auth");

    let info = Step::new("info", http::Method::GET, "/api/info")?
        .with_header("authorization", "Bearer ${token}")?
        .with_check(Check::new("info ok"))
        .with_extract(Extract::json("coins", "coins"))
        .depends_on("auth");

    Ok(Scenario {
        base_url: Some(url::Url::parse(base)?),
        setup: Vec::new(),
        steps: vec![auth, send, info],
        teardown: Vec::new(),
    })
}

fn ident(shared: &SharedContext, vu: u64) -> IterationIdentity {
    let mut rng = rand::thread_rng();
    IterationIdentity::pick(shared, vu, 0, &mut rng)
}

#[tokio::test]
async fn extracted_token_flows_into_later_steps() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let shared = shared(&[("alice", "a"), ("bob", "b")]);
    let scenario = Arc::new(transfer_scenario(server.base_url())?);
    let executor = Executor::new(Arc::new(HttpClient::default()), scenario.clone(), shared.clone());

    // Register bob first so alice's transfer has a recipient.
    let bob = executor.run(&scenario.steps[..1], ident(&shared, 2)).await;
    assert!(bob.steps[0].outcome.succeeded());

    let report = executor.run(&scenario.steps, ident(&shared, 1)).await;
    assert!(report.steps.iter().all(|s| s.outcome.succeeded()), "{:?}", report.steps);
    assert!(report.vars.contains_key("token"));
    assert_eq!(report.vars.get("coins"), Some(&json!(995)));
    assert_eq!(server.stats().self_transfers(), 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unknown_recipient_is_a_rejection_not_a_failure() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let shared = shared(&[("alice", "a"), ("ghost", "g")]);
    let scenario = Arc::new(transfer_scenario(server.base_url())?);
    let executor = Executor::new(Arc::new(HttpClient::default()), scenario.clone(), shared.clone());

    let report = executor.run(&scenario.steps, ident(&shared, 1)).await;
    match &report.steps[1].outcome {
        StepOutcome::Completed {
            status,
            class,
            failed,
            ..
        } => {
            assert_eq!(*status, Some(400));
            assert_eq!(*class, CheckClass::Rejection);
            assert!(!failed);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    // A rejection does not count as success, but `info` only depends on `auth`.
    assert!(report.steps[2].outcome.succeeded());

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn failed_auth_skips_dependent_steps() -> anyhow::Result<()> {
    let server = TestServer::start_with(ShopConfig {
        reject_auth: true,
        ..ShopConfig::default()
    })
    .await?;
    let shared = shared(&[("alice", "a"), ("bob", "b")]);
    let scenario = Arc::new(transfer_scenario(server.base_url())?);
    let executor = Executor::new(Arc::new(HttpClient::default()), scenario.clone(), shared.clone());

    let report = executor.run(&scenario.steps, ident(&shared, 1)).await;

    assert!(!report.steps[0].outcome.succeeded());
    for step in &report.steps[1..] {
        match &step.outcome {
            StepOutcome::Skipped { reason, .. } => assert_eq!(*reason, SkipReason::Dependency),
            other => panic!("{} should be skipped, got {other:?}", step.name),
        }
    }
    assert_eq!(server.stats().send_coin_total(), 0);
    assert_eq!(server.stats().info_total(), 0);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn missing_variable_skips_the_step() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let step = Step::new("info", http::Method::GET, "/api/info")?
        .with_header("authorization", "Bearer ${token}")?;
    let scenario = Arc::new(Scenario {
        base_url: Some(url::Url::parse(server.base_url())?),
        steps: vec![step],
        ..Scenario::default()
    });
    let shared = shared(&[]);
    let executor = Executor::new(Arc::new(HttpClient::default()), scenario.clone(), shared.clone());

    let report = executor.run(&scenario.steps, ident(&shared, 1)).await;

    match &report.steps[0].outcome {
        StepOutcome::Skipped { reason, detail } => {
            assert_eq!(*reason, SkipReason::MissingVar);
            assert!(detail.contains("token"), "{detail}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(server.stats().info_total(), 0);

    server.shutdown().await;
    Ok(())
}
