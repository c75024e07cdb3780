use serde_json::Value;

use crate::context::Scope;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Lit(String),
    Var(String),
}

/// A placeholder that could not be resolved while rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingVar(pub String);

impl std::fmt::Display for MissingVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "missing variable `{}`", self.0)
    }
}

/// A string with `${name}` placeholders, parsed once at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidTemplate {
            template: raw.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = Vec::new();
        let mut rest = raw;
        while let Some(start) = rest.find("${") {
            if start > 0 {
                parts.push(Part::Lit(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| invalid("unterminated `${`"))?;
            let name = after[..end].trim();
            if name.is_empty() {
                return Err(invalid("empty placeholder"));
            }
            parts.push(Part::Var(name.to_string()));
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            parts.push(Part::Lit(rest.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            parts,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn vars(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().filter_map(|p| match p {
            Part::Var(name) => Some(name.as_str()),
            Part::Lit(_) => None,
        })
    }

    /// The placeholder name when the template is exactly one `${name}`.
    pub fn single_var(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [Part::Var(name)] => Some(name),
            _ => None,
        }
    }

    pub fn render(&self, scope: &Scope<'_>) -> std::result::Result<String, MissingVar> {
        let mut out = String::with_capacity(self.raw.len());
        for part in &self.parts {
            match part {
                Part::Lit(s) => out.push_str(s),
                Part::Var(name) => {
                    let value = scope.get(name).ok_or_else(|| MissingVar(name.clone()))?;
                    push_value(&mut out, &value);
                }
            }
        }
        Ok(out)
    }
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

/// A JSON body whose string leaves are templates.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonTemplate {
    Literal(Value),
    Str(Template),
    Array(Vec<JsonTemplate>),
    Object(Vec<(String, JsonTemplate)>),
}

impl JsonTemplate {
    pub fn compile(value: &Value) -> Result<Self> {
        Ok(match value {
            Value::String(s) => {
                let t = Template::parse(s)?;
                if t.vars().next().is_none() {
                    Self::Literal(value.clone())
                } else {
                    Self::Str(t)
                }
            }
            Value::Array(items) => {
                Self::Array(items.iter().map(Self::compile).collect::<Result<_>>()?)
            }
            Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), Self::compile(v)?)))
                    .collect::<Result<_>>()?,
            ),
            other => Self::Literal(other.clone()),
        })
    }

    /// Renders the body. A string leaf that is exactly one placeholder keeps the
    /// variable's JSON type, so `"${amount}"` can produce a number.
    pub fn render(&self, scope: &Scope<'_>) -> std::result::Result<Value, MissingVar> {
        Ok(match self {
            Self::Literal(v) => v.clone(),
            Self::Str(t) => match t.single_var() {
                Some(name) => scope.get(name).ok_or_else(|| MissingVar(name.to_string()))?,
                None => Value::String(t.render(scope)?),
            },
            Self::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|t| t.render(scope))
                    .collect::<std::result::Result<_, _>>()?,
            ),
            Self::Object(fields) => {
                let mut map = serde_json::Map::with_capacity(fields.len());
                for (k, t) in fields {
                    map.insert(k.clone(), t.render(scope)?);
                }
                Value::Object(map)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{SharedContext, Vars};
    use serde_json::json;

    fn with_scope<R>(locals: Vars, f: impl FnOnce(&Scope<'_>) -> R) -> R {
        let shared = SharedContext::default();
        let scope = Scope {
            locals: &locals,
            shared: &shared,
            vu: 1,
            iter: 0,
            user: None,
            peer: None,
            user_vars: None,
            peer_vars: None,
        };
        f(&scope)
    }

    #[test]
    fn renders_literals_and_placeholders() {
        let t = Template::parse("/api/buy/${item}?vu=${vu}").unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(t.vars().collect::<Vec<_>>(), vec!["item", "vu"]);

        let out = with_scope(Vars::from([("item".to_string(), json!("pen"))]), |s| {
            t.render(s)
        });
        assert_eq!(out, Ok("/api/buy/pen?vu=1".to_string()));
    }

    #[test]
    fn missing_variable_is_reported() {
        let t = Template::parse("Bearer ${token}").unwrap_or_else(|e| panic!("{e}"));
        let out = with_scope(Vars::new(), |s| t.render(s));
        assert_eq!(out, Err(MissingVar("token".to_string())));
    }

    #[test]
    fn rejects_malformed_placeholders() {
        assert!(Template::parse("${open").is_err());
        assert!(Template::parse("${ }").is_err());
        assert!(Template::parse("no placeholders").is_ok());
    }

    #[test]
    fn single_placeholder_keeps_json_type() {
        let body = JsonTemplate::compile(&json!({
            "toUser": "${peer}",
            "amount": "${amount}",
            "note": "from ${peer}",
            "tags": ["fixed", 1]
        }))
        .unwrap_or_else(|e| panic!("{e}"));

        let locals = Vars::from([
            ("peer".to_string(), json!("bob")),
            ("amount".to_string(), json!(5)),
        ]);
        let out = with_scope(locals, |s| body.render(s)).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(
            out,
            json!({"toUser": "bob", "amount": 5, "note": "from bob", "tags": ["fixed", 1]})
        );
    }
}
