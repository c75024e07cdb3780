use std::collections::HashSet;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

mod check;
mod extract;
mod template;

pub use check::{Check, CheckClass, StatusSet};
pub use extract::{Extract, ExtractSource, json_path};
pub use template::{JsonTemplate, MissingVar, Template};

/// One HTTP call of a scenario and the check applied to its response.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub method: http::Method,
    pub url: Template,
    pub headers: Vec<(String, Template)>,
    pub body: Option<JsonTemplate>,
    pub check: Check,
    pub extract: Vec<Extract>,
    /// Steps that must have succeeded earlier in the same iteration.
    pub depends_on: Vec<String>,
    pub timeout: Option<Duration>,
    /// Setup only: run once per credential. Extracted variables are stored for
    /// that credential and read back as `${user.<var>}` or `${peer.<var>}`.
    pub per_user: bool,
}

impl Step {
    pub fn new(name: impl Into<String>, method: http::Method, url: &str) -> Result<Self> {
        let name = name.into();
        Ok(Self {
            check: Check::new(name.clone()),
            name,
            method,
            url: Template::parse(url)?,
            headers: Vec::new(),
            body: None,
            extract: Vec::new(),
            depends_on: Vec::new(),
            timeout: None,
            per_user: false,
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: &str) -> Result<Self> {
        self.headers.push((name.into(), Template::parse(value)?));
        Ok(self)
    }

    pub fn with_json_body(mut self, body: &serde_json::Value) -> Result<Self> {
        self.body = Some(JsonTemplate::compile(body)?);
        Ok(self)
    }

    #[must_use]
    pub fn with_check(mut self, check: Check) -> Self {
        self.check = check;
        self
    }

    #[must_use]
    pub fn with_extract(mut self, extract: Extract) -> Self {
        self.extract.push(extract);
        self
    }

    #[must_use]
    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn for_each_user(mut self) -> Self {
        self.per_user = true;
        self
    }

    pub fn needs_json(&self) -> bool {
        self.check.needs_json() || self.extract.iter().any(Extract::needs_json)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scenario {
    pub base_url: Option<Url>,
    pub setup: Vec<Step>,
    pub steps: Vec<Step>,
    pub teardown: Vec<Step>,
}

impl Scenario {
    /// Structural checks done before any request goes out.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::InvalidStep {
                step: String::new(),
                reason: "scenario has no steps".to_string(),
            });
        }
        for phase in [&self.setup, &self.steps, &self.teardown] {
            validate_phase(phase, self.base_url.is_some())?;
        }

        if let Some(step) = self.steps.iter().chain(&self.teardown).find(|s| s.per_user) {
            return Err(Error::InvalidStep {
                step: step.name.clone(),
                reason: "per-user steps are only allowed in setup".to_string(),
            });
        }
        // Per-user steps run after the shared setup steps, as their own sequence.
        for step in self.setup.iter().filter(|s| s.per_user) {
            let shared_dep = step.depends_on.iter().find(|dep| {
                !self
                    .setup
                    .iter()
                    .any(|s| s.per_user && &s.name == *dep)
            });
            if let Some(dep) = shared_dep {
                return Err(Error::InvalidStep {
                    step: step.name.clone(),
                    reason: format!("per-user step cannot depend on shared setup step `{dep}`"),
                });
            }
        }
        Ok(())
    }

    /// Joins a rendered URL onto the base URL when it is relative.
    pub fn resolve_url(&self, rendered: &str) -> String {
        if Url::parse(rendered).is_ok() {
            return rendered.to_string();
        }
        match &self.base_url {
            Some(base) => base
                .join(rendered)
                .map(String::from)
                .unwrap_or_else(|_| rendered.to_string()),
            None => rendered.to_string(),
        }
    }
}

fn validate_phase(steps: &[Step], has_base: bool) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for step in steps {
        let invalid = |reason: String| Error::InvalidStep {
            step: step.name.clone(),
            reason,
        };

        if step.name.is_empty() {
            return Err(invalid("step name must not be empty".to_string()));
        }
        if !seen.insert(step.name.as_str()) {
            return Err(invalid("duplicate step name".to_string()));
        }
        for dep in &step.depends_on {
            if dep == &step.name || !seen.contains(dep.as_str()) {
                return Err(invalid(format!(
                    "`depends_on` must name an earlier step, got `{dep}`"
                )));
            }
        }
        if step.check.success.is_empty() {
            return Err(invalid("check has no success statuses".to_string()));
        }

        let literal_url = step.url.vars().next().is_none();
        if literal_url && !has_base && Url::parse(step.url.raw()).is_err() {
            return Err(invalid(format!(
                "relative url `{}` needs a base url",
                step.url.raw()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(name: &str, url: &str) -> Step {
        Step::new(name, http::Method::GET, url).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn resolves_relative_urls_against_base() {
        let scenario = Scenario {
            base_url: Url::parse("http://127.0.0.1:8080/").ok(),
            steps: vec![step("info", "/api/info")],
            ..Default::default()
        };
        scenario.validate().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            scenario.resolve_url("/api/buy/pen"),
            "http://127.0.0.1:8080/api/buy/pen"
        );
        assert_eq!(
            scenario.resolve_url("http://other:1/x"),
            "http://other:1/x"
        );
    }

    #[test]
    fn rejects_bad_structure() {
        let no_steps = Scenario::default();
        assert!(no_steps.validate().is_err());

        let dup = Scenario {
            base_url: Url::parse("http://h/").ok(),
            steps: vec![step("a", "/a"), step("a", "/b")],
            ..Default::default()
        };
        assert!(dup.validate().is_err());

        let forward_dep = Scenario {
            base_url: Url::parse("http://h/").ok(),
            steps: vec![step("a", "/a").depends_on("b"), step("b", "/b")],
            ..Default::default()
        };
        assert!(forward_dep.validate().is_err());

        let no_base = Scenario {
            steps: vec![step("a", "/a")],
            ..Default::default()
        };
        assert!(no_base.validate().is_err());
    }

    #[test]
    fn per_user_steps_stay_in_setup() {
        let base = Url::parse("http://h/").ok();
        let ok = Scenario {
            base_url: base.clone(),
            setup: vec![
                step("login", "/auth").for_each_user(),
                step("profile", "/info").for_each_user().depends_on("login"),
            ],
            steps: vec![step("a", "/a")],
            ..Default::default()
        };
        ok.validate().unwrap_or_else(|e| panic!("{e}"));

        let in_load = Scenario {
            base_url: base.clone(),
            steps: vec![step("a", "/a").for_each_user()],
            ..Default::default()
        };
        assert!(in_load.validate().is_err());

        let mixed_dep = Scenario {
            base_url: base,
            setup: vec![step("seed", "/seed"), step("login", "/auth").for_each_user().depends_on("seed")],
            steps: vec![step("a", "/a")],
            ..Default::default()
        };
        assert!(mixed_dep.validate().is_err());
    }
}
