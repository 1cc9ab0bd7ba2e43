use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

/// How samples of a metric are aggregated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Summed values, e.g. number of requests.
    Counter,
    /// Last reported value, e.g. live virtual users.
    Gauge,
    /// Ratio of non-zero samples, e.g. check pass rate.
    Rate,
    /// A distribution of values, e.g. latencies.
    Trend,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Rate => "rate",
            MetricKind::Trend => "trend",
        };
        f.write_str(s)
    }
}

/// Ordered key/value labels attached to a sample.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True when every tag in `self` is present in `other` with the same value.
    pub fn is_subset_of(&self, other: &Tags) -> bool {
        self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (idx, (k, v)) in self.iter().enumerate() {
            if idx > 0 {
                write!(f, ",")?;
            }
            write!(f, "{k}:{v}")?;
        }
        write!(f, "}}")
    }
}

/// A single observation. Samples are append-only: once emitted they are never rewritten.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    pub name: Cow<'static, str>,
    pub kind: MetricKind,
    pub value: f64,
    pub tags: Tags,
    pub timestamp: SystemTime,
}

impl MetricSample {
    pub fn new(name: impl Into<Cow<'static, str>>, kind: MetricKind, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            tags: Tags::new(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn counter(name: impl Into<Cow<'static, str>>, value: f64) -> Self {
        Self::new(name, MetricKind::Counter, value)
    }

    pub fn gauge(name: impl Into<Cow<'static, str>>, value: f64) -> Self {
        Self::new(name, MetricKind::Gauge, value)
    }

    pub fn rate(name: impl Into<Cow<'static, str>>, hit: bool) -> Self {
        Self::new(name, MetricKind::Rate, if hit { 1. } else { 0. })
    }

    pub fn trend(name: impl Into<Cow<'static, str>>, value: f64) -> Self {
        Self::new(name, MetricKind::Trend, value)
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key, value);
        self
    }

    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}
