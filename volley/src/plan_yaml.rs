use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use volley_core::scenario::{Check, Extract, Scenario, Step};
use volley_core::{LimiterScope, PlanOptions, ThresholdSet, UserSelection};

/// A plan file after parsing, with relative paths resolved against its directory.
#[derive(Debug, Clone)]
pub(crate) struct LoadedPlan {
    pub name: Option<String>,
    pub options: PlanOptions,
    pub scenario: Scenario,
    pub credentials: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PlanYaml {
    name: Option<String>,
    base_url: Option<String>,

    vus: Option<u64>,
    #[serde(default)]
    duration: Option<YamlDuration>,
    iterations: Option<u64>,

    rps: Option<u64>,
    burst: Option<u64>,
    limiter: Option<String>,

    #[serde(default)]
    think_time: Option<YamlDuration>,
    #[serde(default)]
    graceful_stop: Option<YamlDuration>,
    #[serde(default)]
    timeout: Option<YamlDuration>,

    credentials: Option<PathBuf>,
    user_selection: Option<String>,
    exclude_self: Option<bool>,

    #[serde(default)]
    thresholds: BTreeMap<String, OneOrMany>,

    #[serde(default)]
    setup: Vec<StepYaml>,
    #[serde(default)]
    steps: Vec<StepYaml>,
    #[serde(default)]
    teardown: Vec<StepYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct StepYaml {
    name: String,
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// JSON request body; strings may contain `${...}` placeholders.
    json: Option<serde_yaml::Value>,
    #[serde(default)]
    check: Option<CheckYaml>,
    #[serde(default)]
    extract: Vec<ExtractYaml>,
    #[serde(default)]
    depends_on: Option<OneOrMany>,
    #[serde(default)]
    timeout: Option<YamlDuration>,
    /// Setup only: run once for every credential.
    #[serde(default)]
    per_user: bool,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CheckYaml {
    name: Option<String>,
    success: Option<OneOrMany>,
    rejection: Option<OneOrMany>,
    body_contains: Option<String>,
    #[serde(default)]
    json_has: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ExtractYaml {
    var: String,
    json: Option<String>,
    header: Option<String>,
    #[serde(default)]
    body: bool,
}

/// Status patterns are commonly written as bare numbers (`401`), so accept those too.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(Scalar),
    Many(Vec<Scalar>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Num(u64),
    Str(String),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Num(n) => n.to_string(),
            Self::Str(s) => s,
        }
    }
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(v) => vec![v.into_string()],
            Self::Many(v) => v.into_iter().map(Scalar::into_string).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl<'de> serde::de::Visitor<'de> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0 {
                    return Err(E::custom("duration must not be negative"));
                }
                Ok(YamlDuration(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Duration::try_from_secs_f64(v)
                    .map(YamlDuration)
                    .map_err(|err| E::custom(format!("invalid duration {v}: {err}")))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

pub(crate) async fn load_plan(path: &Path) -> anyhow::Result<LoadedPlan> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read plan: {}", path.display()))?;

    let doc: PlanYaml = serde_yaml::from_slice(&bytes)
        .with_context(|| format!("failed to parse plan YAML: {}", path.display()))?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    plan_from_yaml(doc, base_dir).with_context(|| format!("invalid plan: {}", path.display()))
}

fn plan_from_yaml(doc: PlanYaml, base_dir: &Path) -> anyhow::Result<LoadedPlan> {
    let limiter = doc
        .limiter
        .as_deref()
        .map(|raw| {
            raw.parse::<LimiterScope>()
                .map_err(|_| anyhow::anyhow!("invalid limiter '{raw}' (expected iteration or request)"))
        })
        .transpose()?;

    let user_selection = doc
        .user_selection
        .as_deref()
        .map(|raw| {
            raw.parse::<UserSelection>().map_err(|_| {
                anyhow::anyhow!("invalid userSelection '{raw}' (expected random, roundRobin or iteration)")
            })
        })
        .transpose()?;

    let thresholds = doc
        .thresholds
        .into_iter()
        .map(|(selector, exprs)| Ok(ThresholdSet::parse(&selector, &exprs.into_vec())?))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let base_url = doc
        .base_url
        .as_deref()
        .map(|raw| url::Url::parse(raw).with_context(|| format!("invalid baseUrl '{raw}'")))
        .transpose()?;

    let scenario = Scenario {
        base_url,
        setup: steps_from_yaml(doc.setup, "setup")?,
        steps: steps_from_yaml(doc.steps, "steps")?,
        teardown: steps_from_yaml(doc.teardown, "teardown")?,
    };

    let options = PlanOptions {
        vus: doc.vus,
        duration: doc.duration.map(YamlDuration::into_inner),
        iterations: doc.iterations,
        rps: doc.rps,
        burst: doc.burst,
        limiter,
        think_time: doc.think_time.map(YamlDuration::into_inner),
        graceful_stop: doc.graceful_stop.map(YamlDuration::into_inner),
        timeout: doc.timeout.map(YamlDuration::into_inner),
        user_selection,
        exclude_self: doc.exclude_self,
        thresholds,
    };

    Ok(LoadedPlan {
        name: doc.name,
        options,
        scenario,
        credentials: doc.credentials.map(|p| base_dir.join(p)),
    })
}

fn steps_from_yaml(steps: Vec<StepYaml>, phase: &str) -> anyhow::Result<Vec<Step>> {
    steps
        .into_iter()
        .map(|s| {
            let name = s.name.clone();
            step_from_yaml(s).with_context(|| format!("{phase}: step '{name}'"))
        })
        .collect()
}

fn step_from_yaml(s: StepYaml) -> anyhow::Result<Step> {
    let method = http::Method::from_bytes(s.method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("invalid method '{}'", s.method))?;

    let mut step = Step::new(s.name.clone(), method, &s.url)?
        .with_timeout(s.timeout.map(YamlDuration::into_inner));

    for (name, value) in &s.headers {
        step = step.with_header(name.clone(), value)?;
    }

    if let Some(body) = &s.json {
        let body = serde_json::to_value(body).context("json body is not representable as JSON")?;
        step = step.with_json_body(&body)?;
    }

    let check = s.check.unwrap_or_default();
    step = step.with_check(check_from_yaml(check, &s.name)?);

    for rule in s.extract {
        step = step.with_extract(extract_from_yaml(rule)?);
    }

    for dep in s.depends_on.map(OneOrMany::into_vec).unwrap_or_default() {
        step = step.depends_on(dep);
    }

    if s.per_user {
        step = step.for_each_user();
    }

    Ok(step)
}

fn check_from_yaml(c: CheckYaml, step_name: &str) -> anyhow::Result<Check> {
    let mut check = Check::new(c.name.unwrap_or_else(|| step_name.to_string()));

    if let Some(success) = c.success {
        check.success = volley_core::scenario::StatusSet::empty();
        for pattern in success.into_vec() {
            check.success.push_pattern(&pattern)?;
        }
    }
    for pattern in c.rejection.map(OneOrMany::into_vec).unwrap_or_default() {
        check.rejection.push_pattern(&pattern)?;
    }

    check.body_contains = c.body_contains;
    check.json_has = c.json_has;
    Ok(check)
}

fn extract_from_yaml(e: ExtractYaml) -> anyhow::Result<Extract> {
    match (e.json, e.header, e.body) {
        (Some(path), None, false) => Ok(Extract::json(e.var, path)),
        (None, Some(name), false) => Ok(Extract::header(e.var, name)),
        (None, None, true) => Ok(Extract::body(e.var)),
        _ => anyhow::bail!(
            "extract '{}' must set exactly one of json, header or body",
            e.var
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_core::scenario::{CheckClass, ExtractSource};

    fn parse(yaml: &str) -> anyhow::Result<LoadedPlan> {
        let doc: PlanYaml = serde_yaml::from_str(yaml)?;
        plan_from_yaml(doc, Path::new("/plans"))
    }

    #[test]
    fn full_plan_maps_to_options_and_steps() {
        let plan = parse(
            r#"
name: shop
baseUrl: http://localhost:8080
vus: 10
duration: 30s
rps: 200
burst: 5
limiter: request
thinkTime: 0
gracefulStop: 1.5
credentials: users.txt
userSelection: roundRobin
excludeSelf: false
thresholds:
  http_req_duration: p(95)<50
  checks: [rate>0.9999]
steps:
  - name: auth
    method: post
    url: /api/auth
    json:
      username: ${user.username}
      password: ${user.password}
    check:
      jsonHas: [token]
    extract:
      - var: token
        json: token
  - name: send
    method: POST
    url: /api/sendCoin
    headers:
      authorization: Bearer ${token}
    json:
      toUser: ${peer.username}
      amount: 1
    check:
      name: coins sent
      rejection: 400
    dependsOn: auth
"#,
        )
        .unwrap_or_else(|e| panic!("{e:#}"));

        assert_eq!(plan.name.as_deref(), Some("shop"));
        assert_eq!(plan.credentials, Some(PathBuf::from("/plans/users.txt")));

        let o = &plan.options;
        assert_eq!(o.vus, Some(10));
        assert_eq!(o.duration, Some(Duration::from_secs(30)));
        assert_eq!(o.rps, Some(200));
        assert_eq!(o.burst, Some(5));
        assert_eq!(o.limiter, Some(LimiterScope::Request));
        assert_eq!(o.think_time, Some(Duration::ZERO));
        assert_eq!(o.graceful_stop, Some(Duration::from_millis(1500)));
        assert_eq!(o.user_selection, Some(UserSelection::RoundRobin));
        assert_eq!(o.exclude_self, Some(false));
        assert_eq!(o.thresholds.len(), 2);

        let steps = &plan.scenario.steps;
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].method, http::Method::POST);
        assert!(steps[0].needs_json());
        assert_eq!(steps[0].check.name, "auth");
        assert!(matches!(
            &steps[0].extract[0].source,
            ExtractSource::Json(p) if p == "token"
        ));

        assert_eq!(steps[1].check.name, "coins sent");
        assert_eq!(steps[1].depends_on, vec!["auth".to_string()]);
        assert_eq!(
            steps[1].check.classify(400, b"", None),
            CheckClass::Rejection
        );
        assert_eq!(steps[1].check.classify(200, b"", None), CheckClass::Success);

        plan.scenario
            .validate()
            .unwrap_or_else(|e| panic!("{e}"));
    }

    #[test]
    fn explicit_success_replaces_default_class() {
        let plan = parse(
            r#"
steps:
  - name: created
    url: http://localhost/items
    check:
      success: [201, "204"]
"#,
        )
        .unwrap_or_else(|e| panic!("{e:#}"));

        let check = &plan.scenario.steps[0].check;
        assert_eq!(plan.scenario.steps[0].method, http::Method::GET);
        assert!(check.expects(201));
        assert!(check.expects(204));
        assert!(!check.expects(200));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(parse("limiter: sometimes\nsteps: []\n").is_err());
        assert!(parse("userSelection: everyone\nsteps: []\n").is_err());
        assert!(parse("thresholds:\n  checks: rate>>1\nsteps: []\n").is_err());
        assert!(parse("bogusKey: 1\n").is_err());
        assert!(
            parse("steps:\n  - name: a\n    url: /x\n    extract:\n      - var: v\n").is_err()
        );
        assert!(parse("steps:\n  - name: a\n    url: /x/${oops\n").is_err());
        assert!(parse("duration: soon\n").is_err());
        assert!(parse("duration: 1e300\nsteps: []\n").is_err());
        assert!(parse("duration: -1.5\nsteps: []\n").is_err());
    }

    #[test]
    fn per_user_setup_and_iteration_selection() {
        let plan = parse(
            r#"
baseUrl: http://localhost:8080
userSelection: iteration
setup:
  - name: login
    method: POST
    url: /api/auth
    perUser: true
    json: { username: "${user.username}", password: "${user.password}" }
    extract:
      - var: token
        json: token
steps:
  - name: send
    method: POST
    url: /api/sendCoin
    headers:
      authorization: Bearer ${user.token}
    json: { toUser: "${peer.username}", amount: 1 }
"#,
        )
        .unwrap_or_else(|e| panic!("{e:#}"));

        assert_eq!(plan.options.user_selection, Some(UserSelection::Iteration));
        assert!(plan.scenario.setup[0].per_user);
        assert!(!plan.scenario.steps[0].per_user);
        plan.scenario.validate().unwrap_or_else(|e| panic!("{e}"));

        let misplaced = parse("steps:\n  - name: a\n    url: http://h/a\n    perUser: true\n")
            .unwrap_or_else(|e| panic!("{e:#}"));
        assert!(misplaced.scenario.validate().is_err());
    }

    #[tokio::test]
    async fn load_plan_resolves_credentials_next_to_the_plan() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("plan.yaml");
        std::fs::write(
            &path,
            "name: local\ncredentials: users.txt\nsteps:\n  - name: ping\n    url: http://localhost/ping\n",
        )
        .unwrap_or_else(|e| panic!("{e}"));

        let plan = load_plan(&path).await.unwrap_or_else(|e| panic!("{e:#}"));

        assert_eq!(plan.name.as_deref(), Some("local"));
        assert_eq!(plan.credentials, Some(dir.path().join("users.txt")));
        assert_eq!(plan.scenario.steps.len(), 1);
    }

    #[tokio::test]
    async fn load_plan_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let err = match load_plan(&dir.path().join("absent.yaml")).await {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(format!("{err:#}").contains("failed to read plan"));
    }
}
