use crate::aggregator::Aggregator;
use std::time::Duration;
use surge_core::metric_names::{CHECKS, ITERATIONS, ITERATION_FAILED};
use surge_core::{RunStatistics, Tags, Threshold, ThresholdOutcome};
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// Builds the end-of-run report and evaluates every threshold against it.
pub(crate) fn summarize(
    name: &str,
    metrics: &Aggregator,
    thresholds: &[Threshold],
    elapsed: Duration,
    max_vus: u32,
) -> RunStatistics {
    let root = Tags::new();
    let iterations = metrics
        .summary(ITERATIONS, &root)
        .map(|s| s.sum as u64)
        .unwrap_or(0);
    let failed_iterations = metrics
        .summary(ITERATION_FAILED, &root)
        .map(|s| s.hits)
        .unwrap_or(0);
    let (checks_passed, checks_failed) = metrics
        .summary(CHECKS, &root)
        .map(|s| (s.hits, s.count - s.hits))
        .unwrap_or((0, 0));

    let thresholds = thresholds
        .iter()
        .map(|threshold| evaluate(metrics, threshold, elapsed))
        .collect();

    RunStatistics {
        name: name.to_string(),
        duration: elapsed,
        max_vus,
        iterations,
        failed_iterations,
        checks_passed,
        checks_failed,
        metrics: metrics.snapshot(),
        thresholds,
    }
}

fn evaluate(metrics: &Aggregator, threshold: &Threshold, elapsed: Duration) -> ThresholdOutcome {
    let observed = metrics.aggregate(
        &threshold.metric,
        &threshold.tags,
        threshold.aggregation,
        elapsed,
    );

    // A metric that never received a sample cannot violate its threshold.
    let passed = observed.map_or(true, |value| threshold.passes(value));
    if !passed {
        warn!("Threshold crossed: {threshold} (observed {observed:?})");
    } else if observed.is_none() {
        debug!("Threshold {threshold} has no samples");
    }

    ThresholdOutcome {
        threshold: threshold.to_string(),
        observed,
        passed,
    }
}

/// One-line progress report logged while the run is in flight.
pub(crate) fn progress_line(metrics: &Aggregator, elapsed: Duration, total: Duration, live: usize) -> String {
    let root = Tags::new();
    let iterations = metrics
        .summary(ITERATIONS, &root)
        .map(|s| s.sum as u64)
        .unwrap_or(0);
    let failed = metrics
        .summary(ITERATION_FAILED, &root)
        .map(|s| s.hits)
        .unwrap_or(0);

    format!(
        "{} / {}, {live} VUs, {iterations} iterations ({failed} failed)",
        humantime::format_duration(truncate_to_secs(elapsed)),
        humantime::format_duration(total),
    )
}

fn truncate_to_secs(dur: Duration) -> Duration {
    Duration::from_secs(dur.as_secs())
}
