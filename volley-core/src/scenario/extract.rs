use serde_json::Value;
use volley_http::HttpResponse;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractSource {
    /// Dotted path into the JSON body (`data.items.0.id`).
    Json(String),
    Header(String),
    Body,
}

/// Stores part of a successful response into an iteration variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extract {
    pub var: String,
    pub source: ExtractSource,
}

impl Extract {
    pub fn json(var: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            source: ExtractSource::Json(path.into()),
        }
    }

    pub fn header(var: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            source: ExtractSource::Header(name.into()),
        }
    }

    pub fn body(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            source: ExtractSource::Body,
        }
    }

    pub fn needs_json(&self) -> bool {
        matches!(self.source, ExtractSource::Json(_))
    }

    /// `None` leaves the variable unset.
    pub fn apply(&self, res: &HttpResponse, json: Option<&Value>) -> Option<Value> {
        match &self.source {
            ExtractSource::Json(path) => json_path(json?, path).cloned(),
            ExtractSource::Header(name) => res.header(name).map(Value::from),
            ExtractSource::Body => res.body_utf8().map(Value::from),
        }
    }
}

/// Walks a dotted path. Numeric segments index into arrays.
pub fn json_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |cur, seg| match cur {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
