use std::ops::RangeInclusive;

use serde_json::Value;

use super::extract::json_path;
use crate::error::{Error, Result};

/// A set of HTTP status codes, written as codes (`401`) or classes (`2xx`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSet {
    ranges: Vec<RangeInclusive<u16>>,
}

impl StatusSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn class(leading: u16) -> Self {
        Self {
            ranges: vec![leading * 100..=leading * 100 + 99],
        }
    }

    pub fn codes(codes: impl IntoIterator<Item = u16>) -> Self {
        Self {
            ranges: codes.into_iter().map(|c| c..=c).collect(),
        }
    }

    /// Parses one entry (`"200"`, `"4xx"`) and adds it to the set.
    pub fn push_pattern(&mut self, raw: &str) -> Result<()> {
        let s = raw.trim().to_ascii_lowercase();
        let invalid = || Error::InvalidStatus(raw.to_string());

        if let Some(lead) = s.strip_suffix("xx") {
            let lead: u16 = lead.parse().map_err(|_| invalid())?;
            if !(1..=5).contains(&lead) {
                return Err(invalid());
            }
            self.ranges.push(lead * 100..=lead * 100 + 99);
            return Ok(());
        }

        let code: u16 = s.parse().map_err(|_| invalid())?;
        if !(100..=599).contains(&code) {
            return Err(invalid());
        }
        self.ranges.push(code..=code);
        Ok(())
    }

    pub fn contains(&self, status: u16) -> bool {
        self.ranges.iter().any(|r| r.contains(&status))
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Outcome class of a checked response.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum CheckClass {
    /// Status in the success set and every body predicate held.
    Success,
    /// Status in the expected-rejection set.
    Rejection,
    /// Anything else, including transport errors.
    Failure,
}

impl CheckClass {
    /// Both success and expected rejection count as a passing check.
    pub fn passed(self) -> bool {
        !matches!(self, CheckClass::Failure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub success: StatusSet,
    pub rejection: StatusSet,
    pub body_contains: Option<String>,
    /// Dotted JSON paths that must be present in a success response.
    pub json_has: Vec<String>,
}

impl Check {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            success: StatusSet::class(2),
            rejection: StatusSet::empty(),
            body_contains: None,
            json_has: Vec::new(),
        }
    }

    pub fn needs_json(&self) -> bool {
        !self.json_has.is_empty()
    }

    /// Whether the status counts as a non-failed request (success or expected rejection).
    pub fn expects(&self, status: u16) -> bool {
        self.success.contains(status) || self.rejection.contains(status)
    }

    /// Classifies a response. `json` is the parsed body when [`Check::needs_json`] is set.
    pub fn classify(&self, status: u16, body: &[u8], json: Option<&Value>) -> CheckClass {
        if self.success.contains(status) {
            if let Some(needle) = &self.body_contains
                && !contains_bytes(body, needle.as_bytes())
            {
                return CheckClass::Failure;
            }
            if !self.json_has.is_empty() {
                let Some(json) = json else {
                    return CheckClass::Failure;
                };
                if self.json_has.iter().any(|p| json_path(json, p).is_none()) {
                    return CheckClass::Failure;
                }
            }
            return CheckClass::Success;
        }

        if self.rejection.contains(status) {
            return CheckClass::Rejection;
        }
        CheckClass::Failure
    }
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_patterns() {
        let mut set = StatusSet::empty();
        set.push_pattern("2xx").unwrap_or_else(|e| panic!("{e}"));
        set.push_pattern(" 401 ").unwrap_or_else(|e| panic!("{e}"));
        assert!(set.contains(204));
        assert!(set.contains(401));
        assert!(!set.contains(400));

        assert!(set.push_pattern("9xx").is_err());
        assert!(set.push_pattern("abc").is_err());
        assert!(set.push_pattern("42").is_err());
    }

    #[test]
    fn classifies_success_rejection_failure() {
        let mut check = Check::new("info");
        check.rejection = StatusSet::codes([401]);

        assert_eq!(check.classify(200, b"{}", None), CheckClass::Success);
        assert_eq!(check.classify(401, b"", None), CheckClass::Rejection);
        assert_eq!(check.classify(500, b"", None), CheckClass::Failure);
        assert!(CheckClass::Rejection.passed());
        assert!(!CheckClass::Failure.passed());
        assert!(check.expects(401));
        assert!(!check.expects(500));
    }

    #[test]
    fn body_predicates_apply_to_success_only() {
        let mut check = Check::new("auth");
        check.json_has = vec!["token".to_string()];
        check.body_contains = Some("token".to_string());
        check.rejection = StatusSet::codes([401]);

        let ok = json!({"token": "t"});
        assert_eq!(
            check.classify(200, br#"{"token":"t"}"#, Some(&ok)),
            CheckClass::Success
        );

        let missing = json!({"errors": "x"});
        assert_eq!(
            check.classify(200, br#"{"errors":"x"}"#, Some(&missing)),
            CheckClass::Failure
        );
        assert_eq!(check.classify(200, b"not json", None), CheckClass::Failure);
        assert_eq!(check.classify(401, b"", None), CheckClass::Rejection);
    }
}
