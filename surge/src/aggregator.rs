//! Run-wide metric aggregation.
//!
//! Every virtual user records into the same [`Aggregator`]. Once a series exists, recording
//! is a handful of atomic operations under a shared read lock; the write lock is only taken
//! the first time a metric/tag combination is seen. Trend values land in a lock-free
//! [`AtomicBucket`] and are folded into a TDigest lazily, when a snapshot asks for quantiles.
use metrics_util::AtomicBucket;
use pdatastructs::tdigest::{TDigest, K1};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use surge_core::{Aggregation, MetricKind, MetricSample, MetricSummary, Quantiles, Tags};
#[allow(unused)]
use tracing::{debug, error, trace, warn};

const TDIGEST_BACKLOG_SIZE: usize = 100;

type MetricSeries = HashMap<Tags, Arc<Series>>;

#[derive(Default)]
pub struct Aggregator {
    metrics: RwLock<HashMap<Cow<'static, str>, MetricSeries>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-registers tagged sub-metrics (typically the ones thresholds refer to). A sample
    /// feeds every registered series of its metric whose tags are a subset of its own;
    /// series created by recording only count samples with exactly their tags.
    pub fn with_submetrics<I, S>(submetrics: I) -> Self
    where
        I: IntoIterator<Item = (S, Tags)>,
        S: Into<Cow<'static, str>>,
    {
        let new = Self::new();
        {
            let mut metrics = new.metrics.write().unwrap_or_else(PoisonError::into_inner);
            for (name, tags) in submetrics {
                let series = metrics.entry(name.into()).or_default();
                series.entry(Tags::new()).or_default();
                series
                    .entry(tags)
                    .or_insert_with(|| Arc::new(Series::submetric()));
            }
        }
        new
    }

    pub fn record(&self, sample: MetricSample) {
        #[cfg(feature = "metrics")]
        export(&sample);

        {
            let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(series) = metrics.get(sample.name.as_ref()) {
                if series.contains_key(&sample.tags) {
                    observe_matching(series, &sample);
                    return;
                }
            }
        }

        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        let series = metrics.entry(sample.name.clone()).or_default();
        series.entry(Tags::new()).or_default();
        series.entry(sample.tags.clone()).or_default();
        observe_matching(series, &sample);
    }

    /// Eventually-consistent view of every series that received at least one sample, sorted
    /// by name then tags. The untagged row of a metric covers all of its samples.
    pub fn snapshot(&self) -> Vec<MetricSummary> {
        let mut summaries: Vec<_> = self
            .collect_series()
            .into_iter()
            .filter_map(|(name, tags, series)| series.summarize(name.into_owned(), tags))
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        summaries
    }

    /// Summary of a single series, `None` if it never received a sample.
    pub fn summary(&self, name: &str, tags: &Tags) -> Option<MetricSummary> {
        self.find(name, tags)
            .and_then(|series| series.summarize(name.to_string(), tags.clone()))
    }

    /// Reduces a series to a single number. `elapsed` is used to turn counters into
    /// per-second rates.
    pub fn aggregate(
        &self,
        name: &str,
        tags: &Tags,
        aggregation: Aggregation,
        elapsed: Duration,
    ) -> Option<f64> {
        let series = self.find(name, tags)?;
        let summary = series.summarize(name.to_string(), tags.clone())?;

        let value = match aggregation {
            Aggregation::Count => match summary.kind {
                MetricKind::Counter => summary.sum,
                _ => summary.count as f64,
            },
            Aggregation::Rate => match summary.kind {
                MetricKind::Counter => summary.sum / elapsed.as_secs_f64().max(f64::EPSILON),
                _ => summary.rate(),
            },
            Aggregation::Avg => summary.avg(),
            Aggregation::Min => summary.min,
            Aggregation::Max => summary.max,
            Aggregation::Value => summary.last,
            Aggregation::Med => series.quantile(0.5),
            Aggregation::Percentile(p) => series.quantile(p / 100.),
        };
        Some(value)
    }

    fn find(&self, name: &str, tags: &Tags) -> Option<Arc<Series>> {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        metrics.get(name)?.get(tags).cloned()
    }

    // NOTE: Only the Arcs are cloned under the lock; reading the series happens after it is
    // released so that writers are not held up by a snapshot.
    fn collect_series(&self) -> Vec<(Cow<'static, str>, Tags, Arc<Series>)> {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        metrics
            .iter()
            .flat_map(|(name, series)| {
                series
                    .iter()
                    .map(move |(tags, s)| (name.clone(), tags.clone(), s.clone()))
            })
            .collect()
    }
}

fn observe_matching(series: &MetricSeries, sample: &MetricSample) {
    for (tags, s) in series.iter() {
        let matches = if s.submetric {
            tags.is_subset_of(&sample.tags)
        } else {
            tags.is_empty() || *tags == sample.tags
        };
        if matches {
            s.observe(sample.kind, sample.value);
        }
    }
}

struct Series {
    submetric: bool,
    kind: OnceLock<MetricKind>,
    count: AtomicU64,
    hits: AtomicU64,
    sum: AtomicF64,
    min: AtomicF64,
    max: AtomicF64,
    last: AtomicF64,
    values: AtomicBucket<f64>,
    digest: Mutex<TDigest<K1>>,
}

impl Default for Series {
    fn default() -> Self {
        Self {
            submetric: false,
            kind: OnceLock::new(),
            count: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            sum: AtomicF64::new(0.),
            min: AtomicF64::new(f64::INFINITY),
            max: AtomicF64::new(f64::NEG_INFINITY),
            last: AtomicF64::new(0.),
            values: AtomicBucket::new(),
            digest: Mutex::new(default_tdigest()),
        }
    }
}

impl Series {
    fn submetric() -> Self {
        Self {
            submetric: true,
            ..Self::default()
        }
    }

    fn observe(&self, kind: MetricKind, value: f64) {
        let kind = *self.kind.get_or_init(|| kind);

        self.sum.update(|sum| sum + value);
        self.min.update(|min| min.min(value));
        self.max.update(|max| max.max(value));
        self.last.store(value);
        if value != 0. {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        if kind == MetricKind::Trend {
            self.values.push(value);
        }
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn summarize(&self, name: String, tags: Tags) -> Option<MetricSummary> {
        let kind = *self.kind.get()?;
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return None;
        }

        let quantiles = (kind == MetricKind::Trend).then(|| Quantiles {
            med: self.quantile(0.5),
            p90: self.quantile(0.90),
            p95: self.quantile(0.95),
            p99: self.quantile(0.99),
        });

        Some(MetricSummary {
            name,
            tags,
            kind,
            count,
            sum: self.sum.load(),
            min: self.min.load(),
            max: self.max.load(),
            last: self.last.load(),
            hits: self.hits.load(Ordering::Relaxed),
            quantiles,
        })
    }

    fn quantile(&self, q: f64) -> f64 {
        let mut digest = self.digest.lock().unwrap_or_else(PoisonError::into_inner);
        self.values.clear_with(|values| {
            for v in values {
                digest.insert(*v);
            }
        });

        let value = digest.quantile(q.clamp(0., 1.));
        // TODO: TDigest returns NaN for some inputs (notably an empty digest); track down
        // whether a newer pdatastructs fixes this.
        if value.is_finite() {
            value
        } else {
            0.
        }
    }
}

struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn update(&self, f: impl Fn(f64) -> f64) {
        // NOTE: The closure always returns Some, so this cannot fail.
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some(f(f64::from_bits(bits)).to_bits())
            });
    }
}

fn default_tdigest() -> TDigest<K1> {
    TDigest::new(K1::new(10.), TDIGEST_BACKLOG_SIZE)
}

#[cfg(feature = "metrics")]
fn export(sample: &MetricSample) {
    let name = format!("surge_{}", sample.name);
    let mut labels: Vec<metrics::Label> = sample
        .tags
        .iter()
        .map(|(k, v)| metrics::Label::new(k.to_string(), v.to_string()))
        .collect();

    match sample.kind {
        MetricKind::Counter => metrics::counter!(name, labels).increment(sample.value as u64),
        MetricKind::Gauge => metrics::gauge!(name, labels).set(sample.value),
        MetricKind::Rate => {
            labels.push(metrics::Label::new("hit", (sample.value != 0.).to_string()));
            metrics::counter!(name, labels).increment(1);
        }
        MetricKind::Trend => metrics::histogram!(name, labels).record(sample.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surge_core::metric_names::{CHECKS, GRPC_REQS, GRPC_REQ_DURATION};

    #[test]
    fn counts_and_extremes() {
        let agg = Aggregator::new();
        for v in [3., 1., 4., 1., 5.] {
            agg.record(MetricSample::trend(GRPC_REQ_DURATION, v));
        }

        let summary = agg.summary(GRPC_REQ_DURATION, &Tags::new()).unwrap();
        assert_eq!(summary.count, 5);
        assert_eq!(summary.sum, 14.);
        assert_eq!(summary.min, 1.);
        assert_eq!(summary.max, 5.);
        assert_eq!(summary.last, 5.);
        assert!((summary.avg() - 2.8).abs() < f64::EPSILON);
        assert!(summary.quantiles.is_some());
    }

    #[test]
    fn rates_and_tagged_series() {
        let agg = Aggregator::new();
        for passed in [true, true, false, true] {
            agg.record(MetricSample::rate(CHECKS, passed).tag("check", "status is OK"));
        }
        agg.record(MetricSample::rate(CHECKS, false).tag("check", "has name"));

        let all = agg.summary(CHECKS, &Tags::new()).unwrap();
        assert_eq!(all.count, 5);
        assert_eq!(all.hits, 3);

        let status = agg
            .summary(CHECKS, &Tags::new().with("check", "status is OK"))
            .unwrap();
        assert_eq!(status.rate(), 0.75);

        let snapshot = agg.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot[0].tags.is_empty());
    }

    #[test]
    fn registered_submetrics_match_on_subsets() {
        let status_ok = Tags::new().with("status", "Ok");
        let agg = Aggregator::with_submetrics([(GRPC_REQS, status_ok.clone())]);

        agg.record(
            MetricSample::counter(GRPC_REQS, 1.)
                .tag("method", "/HelloService/SayHello")
                .tag("status", "Ok"),
        );
        agg.record(
            MetricSample::counter(GRPC_REQS, 1.)
                .tag("method", "/HelloService/SayHello")
                .tag("status", "Unavailable"),
        );

        let elapsed = Duration::from_secs(2);
        assert_eq!(
            agg.aggregate(GRPC_REQS, &status_ok, Aggregation::Count, elapsed),
            Some(1.)
        );
        assert_eq!(
            agg.aggregate(GRPC_REQS, &Tags::new(), Aggregation::Count, elapsed),
            Some(2.)
        );
        assert_eq!(
            agg.aggregate(GRPC_REQS, &Tags::new(), Aggregation::Rate, elapsed),
            Some(1.)
        );
    }

    #[test]
    fn recorded_tag_sets_count_only_their_own_samples() {
        let agg = Aggregator::new();
        let a = Tags::new().with("a", "1");
        let ab = a.clone().with("b", "2");

        agg.record(MetricSample::counter("custom", 1.).tag("a", "1"));
        for _ in 0..2 {
            agg.record(MetricSample::counter("custom", 1.).tag("a", "1").tag("b", "2"));
        }

        assert_eq!(agg.summary("custom", &a).unwrap().count, 1);
        assert_eq!(agg.summary("custom", &ab).unwrap().count, 2);
        assert_eq!(agg.summary("custom", &Tags::new()).unwrap().count, 3);

        let registered = Aggregator::with_submetrics([("custom", a.clone())]);
        registered.record(MetricSample::counter("custom", 1.).tag("a", "1"));
        registered.record(MetricSample::counter("custom", 1.).tag("a", "1").tag("b", "2"));
        assert_eq!(registered.summary("custom", &a).unwrap().count, 2);
        assert_eq!(registered.summary("custom", &ab).unwrap().count, 1);
    }

    #[test]
    fn unseen_metrics_have_no_value() {
        let agg = Aggregator::with_submetrics([(CHECKS, Tags::new().with("check", "x"))]);
        assert!(agg.snapshot().is_empty());
        assert_eq!(
            agg.aggregate(CHECKS, &Tags::new(), Aggregation::Rate, Duration::ZERO),
            None
        );
    }

    #[test]
    fn percentiles_from_trends() {
        let agg = Aggregator::new();
        for v in 1..=1_000 {
            agg.record(MetricSample::trend(GRPC_REQ_DURATION, v as f64));
        }
        let p95 = agg
            .aggregate(
                GRPC_REQ_DURATION,
                &Tags::new(),
                Aggregation::Percentile(95.),
                Duration::from_secs(1),
            )
            .unwrap();
        assert!((900. ..=1_000.).contains(&p95), "p95={p95}");
    }

    #[test]
    fn noisy_latencies_keep_quantiles_ordered() {
        use rand_distr::{Distribution, SkewNormal};

        let agg = Aggregator::new();
        let latency = SkewNormal::new(50., 10., 20.).unwrap();
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            let v: f64 = latency.sample(&mut rng);
            agg.record(MetricSample::trend(GRPC_REQ_DURATION, v.max(0.)));
        }

        let summary = agg.summary(GRPC_REQ_DURATION, &Tags::new()).unwrap();
        let at = |q| {
            agg.aggregate(
                GRPC_REQ_DURATION,
                &Tags::new(),
                Aggregation::Percentile(q),
                Duration::from_secs(1),
            )
            .unwrap()
        };
        let (p50, p95, p99) = (at(50.), at(95.), at(99.));
        assert!(summary.min <= p50, "min={} p50={p50}", summary.min);
        assert!(p50 < p95 && p95 <= p99, "p50={p50} p95={p95} p99={p99}");
        assert!(p99 <= summary.max);
        assert!((45. ..70.).contains(&summary.avg()), "avg={}", summary.avg());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_lose_nothing() {
        const USERS: usize = 64;
        const SAMPLES: usize = 500;

        let agg = Arc::new(Aggregator::new());
        let tasks: Vec<_> = (0..USERS)
            .map(|user| {
                let agg = agg.clone();
                tokio::spawn(async move {
                    for i in 0..SAMPLES {
                        agg.record(
                            MetricSample::counter(GRPC_REQS, 1.).tag("vu", user.to_string()),
                        );
                        if i % 100 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        let total = agg.summary(GRPC_REQS, &Tags::new()).unwrap();
        assert_eq!(total.count, (USERS * SAMPLES) as u64);
        assert_eq!(total.sum, (USERS * SAMPLES) as f64);

        let one = agg
            .summary(GRPC_REQS, &Tags::new().with("vu", "7"))
            .unwrap();
        assert_eq!(one.count, SAMPLES as u64);
    }
}
