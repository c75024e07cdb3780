use crate::error::{Error, Result};

/// Threshold expressions attached to one metric series.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    pub metric: String,
    /// Exact tag set of the series, sorted by key. Empty selects the untagged series.
    pub tags: Vec<(String, String)>,
    pub expressions: Vec<ThresholdExpr>,
}

impl ThresholdSet {
    /// Parses a selector (`name` or `name{tag:value,...}`) and its expressions.
    pub fn parse(selector: &str, expressions: &[String]) -> Result<Self> {
        let (metric, tags) = parse_selector(selector).map_err(|reason| Error::InvalidThreshold {
            metric: selector.to_string(),
            reason,
        })?;

        let expressions = expressions
            .iter()
            .map(|raw| {
                parse_threshold_expr(raw).map_err(|reason| Error::InvalidThreshold {
                    metric: selector.to_string(),
                    reason,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            metric,
            tags,
            expressions,
        })
    }

    pub fn selector(&self) -> String {
        if self.tags.is_empty() {
            return self.metric.clone();
        }
        let tags: Vec<String> = self.tags.iter().map(|(k, v)| format!("{k}:{v}")).collect();
        format!("{}{{{}}}", self.metric, tags.join(","))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdAgg {
    Avg,
    Min,
    Max,
    Count,
    Rate,
    Med,
    P(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdExpr {
    /// The expression as written, for reporting.
    pub source: String,
    pub agg: ThresholdAgg,
    pub op: ThresholdOp,
    pub value: f64,
}

fn parse_selector(raw: &str) -> std::result::Result<(String, Vec<(String, String)>), String> {
    let s = raw.trim();
    let Some(open) = s.find('{') else {
        if s.is_empty() || s.contains('}') {
            return Err(format!("invalid metric selector: {raw}"));
        }
        return Ok((s.to_string(), Vec::new()));
    };

    let name = s[..open].trim();
    let inner = s[open + 1..]
        .strip_suffix('}')
        .ok_or_else(|| format!("unterminated tag selector: {raw}"))?;
    if name.is_empty() {
        return Err(format!("missing metric name in selector: {raw}"));
    }

    let mut tags = Vec::new();
    for pair in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (k, v) = pair
            .split_once(':')
            .or_else(|| pair.split_once('='))
            .ok_or_else(|| format!("invalid tag `{pair}` in selector: {raw}"))?;
        let (k, v) = (k.trim(), v.trim());
        if k.is_empty() || v.is_empty() {
            return Err(format!("invalid tag `{pair}` in selector: {raw}"));
        }
        tags.push((k.to_string(), v.to_string()));
    }
    tags.sort();
    tags.dedup_by(|a, b| a.0 == b.0);

    Ok((name.to_string(), tags))
}

pub fn parse_threshold_expr(raw: &str) -> std::result::Result<ThresholdExpr, String> {
    let s: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if s.is_empty() {
        return Err("empty threshold".to_string());
    }

    let ops = [
        ("<=", ThresholdOp::Lte),
        (">=", ThresholdOp::Gte),
        ("==", ThresholdOp::Eq),
        ("<", ThresholdOp::Lt),
        (">", ThresholdOp::Gt),
    ];
    let (op_pos, op_len, op) = ops
        .iter()
        .find_map(|(tok, op)| s.find(tok).map(|pos| (pos, tok.len(), *op)))
        .ok_or_else(|| format!("invalid threshold (missing operator): {raw}"))?;

    let (left, right_with_op) = s.split_at(op_pos);
    let right = &right_with_op[op_len..];
    if left.is_empty() || right.is_empty() {
        return Err(format!("invalid threshold: {raw}"));
    }

    let agg = if left.eq_ignore_ascii_case("avg") {
        ThresholdAgg::Avg
    } else if left.eq_ignore_ascii_case("min") {
        ThresholdAgg::Min
    } else if left.eq_ignore_ascii_case("max") {
        ThresholdAgg::Max
    } else if left.eq_ignore_ascii_case("count") {
        ThresholdAgg::Count
    } else if left.eq_ignore_ascii_case("rate") {
        ThresholdAgg::Rate
    } else if left.eq_ignore_ascii_case("med") {
        ThresholdAgg::Med
    } else if let Some(inner) = left.strip_prefix("p(").and_then(|v| v.strip_suffix(')')) {
        let p: f64 = inner
            .parse()
            .map_err(|_| format!("invalid percentile in threshold: {raw}"))?;
        if !(p > 0.0 && p <= 100.0) {
            return Err(format!("percentile out of range in threshold: {raw}"));
        }
        ThresholdAgg::P(p)
    } else {
        return Err(format!("unknown aggregation `{left}` in threshold: {raw}"));
    };

    let value: f64 = right
        .parse()
        .map_err(|_| format!("invalid numeric value in threshold: {raw}"))?;

    Ok(ThresholdExpr {
        source: raw.trim().to_string(),
        agg,
        op,
        value,
    })
}
