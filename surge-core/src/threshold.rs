use crate::{ConfigError, Tags};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which aggregate of a metric a threshold looks at.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Aggregation {
    /// Sum for counters, number of samples otherwise.
    Count,
    /// Ratio of non-zero samples for rates, events per second for counters.
    Rate,
    Avg,
    Min,
    Max,
    Med,
    /// Last value of a gauge.
    Value,
    /// Percentile in `0..=100`.
    Percentile(f64),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Operator {
    fn apply(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Lt => lhs < rhs,
            Operator::Le => lhs <= rhs,
            Operator::Gt => lhs > rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Eq => lhs == rhs,
            Operator::Ne => lhs != rhs,
        }
    }
}

/// A pass/fail criterion over an aggregated metric, e.g. `grpc_req_duration: p(95)<500`.
///
/// The metric selector may narrow down to a tagged sub-metric with
/// `name{key:value,other:value}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: String,
    pub tags: Tags,
    pub aggregation: Aggregation,
    pub operator: Operator,
    pub value: f64,
    source: String,
}

impl Threshold {
    pub fn parse(selector: &str, expression: &str) -> Result<Self, ConfigError> {
        let source = format!("{}: {}", selector.trim(), expression.trim());
        let invalid = |reason: &str| ConfigError::InvalidThreshold {
            input: source.clone(),
            reason: reason.to_string(),
        };

        let (metric, tags) = parse_selector(selector.trim()).ok_or_else(|| invalid("bad metric selector"))?;
        if metric.is_empty() {
            return Err(invalid("missing metric name"));
        }

        let expression: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
        let op_start = expression
            .find(|c| matches!(c, '<' | '>' | '=' | '!'))
            .ok_or_else(|| invalid("missing comparison operator"))?;
        let (aggregation, rest) = expression.split_at(op_start);

        let (operator, value) = [
            ("<=", Operator::Le),
            (">=", Operator::Ge),
            ("==", Operator::Eq),
            ("!=", Operator::Ne),
            ("<", Operator::Lt),
            (">", Operator::Gt),
            ("=", Operator::Eq),
        ]
        .iter()
        .find_map(|(token, op)| rest.strip_prefix(token).map(|value| (*op, value)))
        .ok_or_else(|| invalid("unknown comparison operator"))?;

        let value = value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| invalid("threshold value is not a number"))?;

        let aggregation = parse_aggregation(aggregation).ok_or_else(|| invalid("unknown aggregation"))?;

        Ok(Self {
            metric: metric.to_string(),
            tags,
            aggregation,
            operator,
            value,
            source,
        })
    }

    /// Parses the `<selector>=<expression>` form used on the command line.
    pub fn parse_pair(input: &str) -> Result<Self, ConfigError> {
        let (selector, expression) = Self::split_pair(input)?;
        Self::parse(selector, expression)
    }

    /// Splits `<selector>=<expression>` into its trimmed halves.
    pub fn split_pair(input: &str) -> Result<(&str, &str), ConfigError> {
        let (selector, expression) = input.split_once('=').ok_or_else(|| ConfigError::InvalidThreshold {
            input: input.to_string(),
            reason: "expected `<metric>=<expression>`".to_string(),
        })?;
        Ok((selector.trim(), expression.trim()))
    }

    pub fn passes(&self, observed: f64) -> bool {
        self.operator.apply(observed, self.value)
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_selector(selector: &str) -> Option<(&str, Tags)> {
    let Some((name, rest)) = selector.split_once('{') else {
        return Some((selector, Tags::new()));
    };
    let body = rest.strip_suffix('}')?;

    let mut tags = Tags::new();
    for pair in body.split(',').filter(|p| !p.trim().is_empty()) {
        let (k, v) = pair.split_once(':')?;
        tags.insert(k.trim(), v.trim());
    }
    Some((name.trim(), tags))
}

fn parse_aggregation(input: &str) -> Option<Aggregation> {
    let aggregation = match input {
        "count" => Aggregation::Count,
        "rate" => Aggregation::Rate,
        "avg" => Aggregation::Avg,
        "min" => Aggregation::Min,
        "max" => Aggregation::Max,
        "med" => Aggregation::Med,
        "value" => Aggregation::Value,
        _ => {
            let p = input.strip_prefix("p(")?.strip_suffix(')')?.parse::<f64>().ok()?;
            if !(0. ..=100.).contains(&p) {
                return None;
            }
            Aggregation::Percentile(p)
        }
    };
    Some(aggregation)
}
