use crate::{MetricKind, Tags, THRESHOLDS_FAILED_EXIT_CODE};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Aggregated view of one metric (or one tagged sub-metric).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MetricSummary {
    pub name: String,
    pub tags: Tags,
    pub kind: MetricKind,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
    /// Number of non-zero samples.
    pub hits: u64,
    /// Only populated for trends.
    pub quantiles: Option<Quantiles>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Quantiles {
    pub med: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl MetricSummary {
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.
        } else {
            self.sum / self.count as f64
        }
    }

    /// Ratio of non-zero samples.
    pub fn rate(&self) -> f64 {
        if self.count == 0 {
            0.
        } else {
            self.hits as f64 / self.count as f64
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub threshold: String,
    /// `None` when the metric never received a sample.
    pub observed: Option<f64>,
    pub passed: bool,
}

/// Statistics for a completed scenario run.
#[derive(Clone, Debug, Serialize)]
pub struct RunStatistics {
    pub name: String,
    #[serde(serialize_with = "crate::duration::serialize")]
    pub duration: Duration,
    pub max_vus: u32,
    pub iterations: u64,
    pub failed_iterations: u64,
    pub checks_passed: u64,
    pub checks_failed: u64,
    pub metrics: Vec<MetricSummary>,
    pub thresholds: Vec<ThresholdOutcome>,
}

impl RunStatistics {
    pub fn passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            THRESHOLDS_FAILED_EXIT_CODE
        }
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics
            .iter()
            .find(|m| m.name == name && m.tags.is_empty())
    }

    pub fn check_pass_rate(&self) -> f64 {
        let total = self.checks_passed + self.checks_failed;
        if total == 0 {
            0.
        } else {
            self.checks_passed as f64 / total as f64
        }
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "scenario {} finished in {} (max {} VUs)",
            self.name,
            humantime::format_duration(round_to_millis(self.duration)),
            self.max_vus
        )?;

        for metric in &self.metrics {
            let label = if metric.tags.is_empty() {
                metric.name.clone()
            } else {
                format!("{}{}", metric.name, metric.tags)
            };
            write!(f, "  {label:.<40} ")?;
            match metric.kind {
                MetricKind::Counter => writeln!(
                    f,
                    "{} {:.2}/s",
                    metric.sum,
                    metric.sum / self.duration.as_secs_f64().max(f64::EPSILON)
                )?,
                MetricKind::Gauge => {
                    writeln!(f, "{} min={} max={}", metric.last, metric.min, metric.max)?
                }
                MetricKind::Rate => writeln!(
                    f,
                    "{:.2}% {} / {}",
                    metric.rate() * 100.,
                    metric.hits,
                    metric.count - metric.hits
                )?,
                MetricKind::Trend => {
                    write!(
                        f,
                        "avg={:.2} min={:.2} max={:.2}",
                        metric.avg(),
                        metric.min,
                        metric.max
                    )?;
                    if let Some(q) = metric.quantiles {
                        write!(
                            f,
                            " med={:.2} p(90)={:.2} p(95)={:.2} p(99)={:.2}",
                            q.med, q.p90, q.p95, q.p99
                        )?;
                    }
                    writeln!(f)?
                }
            }
        }

        for outcome in &self.thresholds {
            let mark = if outcome.passed { "✓" } else { "✗" };
            match outcome.observed {
                Some(observed) => writeln!(f, "  {mark} {} (observed {observed:.4})", outcome.threshold)?,
                None => writeln!(f, "  {mark} {} (no samples)", outcome.threshold)?,
            }
        }

        Ok(())
    }
}

fn round_to_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}
