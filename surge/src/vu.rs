//! Virtual users and the iteration executor.
//!
//! A virtual user is a tokio task that repeatedly runs the scenario body, records the outcome
//! and pauses. Stopping a user is cooperative: the in-flight iteration always completes and
//! the user exits before starting another one.
use crate::aggregator::Aggregator;
use crate::error::IterationError;
use futures_util::FutureExt;
use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use surge_core::metric_names::{ITERATIONS, ITERATION_DURATION, ITERATION_ERRORS, ITERATION_FAILED};
use surge_core::{MetricSample, ScenarioConfig};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn, Instrument};

/// State shared by every virtual user of a run.
#[derive(Clone)]
pub(crate) struct RunContext {
    pub config: Arc<ScenarioConfig>,
    pub metrics: Arc<Aggregator>,
}

impl RunContext {
    pub fn new(config: ScenarioConfig, metrics: Aggregator) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(metrics),
        }
    }
}

#[derive(Clone)]
struct VuContext {
    id: u64,
    iteration: u64,
    run: RunContext,
}

tokio::task_local! {
    static VU_CONTEXT: VuContext;
}

/// Identifier of the virtual user running the current iteration. Ids start at 1.
pub fn id() -> Option<u64> {
    VU_CONTEXT.try_with(|ctx| ctx.id).ok()
}

/// Zero-based iteration counter of the current virtual user.
pub fn iteration() -> Option<u64> {
    VU_CONTEXT.try_with(|ctx| ctx.iteration).ok()
}

/// Configuration of the running scenario.
pub fn config() -> Option<Arc<ScenarioConfig>> {
    VU_CONTEXT.try_with(|ctx| ctx.run.config.clone()).ok()
}

/// Records a sample into the run's aggregator. Outside of a virtual user there is nowhere to
/// record to, so the sample is dropped.
pub fn emit(sample: MetricSample) {
    match VU_CONTEXT.try_with(|ctx| ctx.run.metrics.clone()) {
        Ok(metrics) => metrics.record(sample),
        Err(_) => trace!("No virtual user context; dropping sample {}", sample.name),
    }
}

/// Converts whatever a scenario body returns into an iteration outcome.
pub trait IterationOutcome {
    fn into_outcome(self) -> Result<(), IterationError>;
}

impl IterationOutcome for () {
    fn into_outcome(self) -> Result<(), IterationError> {
        Ok(())
    }
}

impl<T, E> IterationOutcome for Result<T, E>
where
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    fn into_outcome(self) -> Result<(), IterationError> {
        self.map(|_| ())
            .map_err(|err| IterationError::from_boxed(err.into()))
    }
}

/// Cooperative stop flag for a single virtual user.
#[derive(Default)]
pub(crate) struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Sleeps for `dur`, returning early if the user is stopped meanwhile. Returns whether the
    /// user is stopped.
    pub async fn pause(&self, dur: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // NOTE: Registers interest before re-checking the flag, otherwise a stop landing
        // between the check and the select would be missed.
        notified.as_mut().enable();
        if self.is_stopped() {
            return true;
        }

        tokio::select! {
            _ = &mut notified => true,
            _ = tokio::time::sleep(dur) => self.is_stopped(),
        }
    }
}

pub(crate) struct VirtualUser {
    id: u64,
    stop: Arc<StopSignal>,
    handle: JoinHandle<()>,
}

impl VirtualUser {
    pub fn spawn<T, F, R>(id: u64, scenario: T, ctx: RunContext) -> Self
    where
        T: Fn() -> F + Send + Sync + 'static,
        F: Future<Output = R> + Send + 'static,
        R: IterationOutcome + Send + 'static,
    {
        let stop = Arc::new(StopSignal::default());
        let handle = tokio::spawn(run_user(id, scenario, ctx, stop.clone()).in_current_span());
        Self { id, stop, handle }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            error!("Virtual user {} did not shut down cleanly: {err}", self.id);
        }
    }
}

async fn run_user<T, F, R>(id: u64, scenario: T, ctx: RunContext, stop: Arc<StopSignal>)
where
    T: Fn() -> F + Send + Sync + 'static,
    F: Future<Output = R> + Send + 'static,
    R: IterationOutcome + Send + 'static,
{
    trace!("Virtual user {id} started");
    let pause = ctx.config.iteration_pause;
    let mut iteration = 0;
    while !stop.is_stopped() {
        let vu = VuContext {
            id,
            iteration,
            run: ctx.clone(),
        };
        // Failures are recorded inside; the loop keeps going regardless.
        let _ = execute_iteration(&scenario, vu).await;
        iteration += 1;

        if stop.pause(pause).await {
            break;
        }
    }
    trace!("Virtual user {id} stopped after {iteration} iterations");
}

/// Runs one iteration of the scenario body and records its outcome. Panics are caught and
/// reported as failures.
async fn execute_iteration<T, F, R>(scenario: &T, vu: VuContext) -> Result<(), IterationError>
where
    T: Fn() -> F,
    F: Future<Output = R>,
    R: IterationOutcome,
{
    let metrics = vu.run.metrics.clone();
    let id = vu.id;
    let start = Instant::now();

    let outcome = VU_CONTEXT
        .scope(vu, AssertUnwindSafe(async { scenario().await }).catch_unwind())
        .await;
    let elapsed = start.elapsed();

    let outcome = match outcome {
        Ok(res) => res.into_outcome(),
        Err(payload) => Err(IterationError::from_panic(payload)),
    };

    metrics.record(MetricSample::counter(ITERATIONS, 1.));
    metrics.record(MetricSample::trend(
        ITERATION_DURATION,
        elapsed.as_secs_f64() * 1_000.,
    ));
    metrics.record(MetricSample::rate(ITERATION_FAILED, outcome.is_err()));

    if let Err(err) = &outcome {
        metrics.record(MetricSample::counter(ITERATION_ERRORS, 1.).tag("kind", err.kind()));
        warn!("Virtual user {id} iteration failed: {err}");
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RpcError, StateError};
    use std::sync::atomic::AtomicU64;
    use surge_core::Tags;
    use tracing_test::traced_test;

    fn context(pause: Duration) -> RunContext {
        let mut config = ScenarioConfig::new("vu-test");
        config.iteration_pause = pause;
        RunContext::new(config, Aggregator::new())
    }

    fn count(ctx: &RunContext, name: &str) -> u64 {
        ctx.metrics
            .summary(name, &Tags::new())
            .map(|s| s.count)
            .unwrap_or(0)
    }

    #[tokio::test(start_paused = true)]
    async fn records_successful_iterations() {
        let ctx = context(Duration::from_secs(1));
        let vu = VuContext {
            id: 1,
            iteration: 0,
            run: ctx.clone(),
        };

        let res = execute_iteration(&|| async { Ok::<_, RpcError>(()) }, vu).await;
        assert!(res.is_ok());
        assert_eq!(count(&ctx, ITERATIONS), 1);
        assert_eq!(
            ctx.metrics
                .summary(ITERATION_FAILED, &Tags::new())
                .unwrap()
                .hits,
            0
        );
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn failures_are_tagged_by_kind() {
        let ctx = context(Duration::from_secs(1));
        let vu = VuContext {
            id: 1,
            iteration: 0,
            run: ctx.clone(),
        };

        let res = execute_iteration(
            &|| async { Err::<(), _>(RpcError::State(StateError::NotConnected)) },
            vu,
        )
        .await;
        assert!(matches!(res, Err(IterationError::State(StateError::NotConnected))));

        let tagged = ctx
            .metrics
            .summary(ITERATION_ERRORS, &Tags::new().with("kind", "state"))
            .unwrap();
        assert_eq!(tagged.sum, 1.);
        assert!(logs_contain("iteration failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn panics_fail_the_iteration_only() {
        let ctx = context(Duration::from_millis(100));
        let vu = VuContext {
            id: 3,
            iteration: 0,
            run: ctx.clone(),
        };

        let res = execute_iteration(
            &|| async {
                if vu_id_is(3) {
                    panic!("boom");
                }
            },
            vu,
        )
        .await;
        assert!(matches!(res, Err(IterationError::Panic(msg)) if msg == "boom"));
        assert_eq!(count(&ctx, ITERATIONS), 1);
    }

    fn vu_id_is(expected: u64) -> bool {
        id() == Some(expected)
    }

    #[tokio::test(start_paused = true)]
    async fn exposes_context_inside_iterations() {
        let ctx = context(Duration::from_millis(10));
        let seen = Arc::new(AtomicU64::new(0));

        let user = {
            let seen = seen.clone();
            VirtualUser::spawn(
                7,
                move || {
                    let seen = seen.clone();
                    async move {
                        assert_eq!(id(), Some(7));
                        assert_eq!(config().map(|c| c.name.clone()), Some("vu-test".into()));
                        seen.store(iteration().unwrap_or(0), Ordering::SeqCst);
                    }
                },
                ctx.clone(),
            )
        };

        tokio::time::sleep(Duration::from_millis(55)).await;
        user.stop();
        user.join().await;

        assert!(seen.load(Ordering::SeqCst) >= 4);
        assert_eq!(
            ctx.metrics
                .summary(ITERATION_FAILED, &Tags::new())
                .unwrap()
                .hits,
            0
        );
        assert_eq!(id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_lets_the_current_iteration_finish() {
        let ctx = context(Duration::from_secs(1));
        let finished = Arc::new(AtomicU64::new(0));

        let user = {
            let finished = finished.clone();
            VirtualUser::spawn(
                1,
                move || {
                    let finished = finished.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                        finished.fetch_add(1, Ordering::SeqCst);
                    }
                },
                ctx.clone(),
            )
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        let start = Instant::now();
        user.stop();
        user.join().await;

        // Finished the in-flight call, skipped the pause, started nothing new.
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(count(&ctx, ITERATIONS), 1);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_wakes_on_stop() {
        let signal = Arc::new(StopSignal::default());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.pause(Duration::from_secs(60)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.stop();
        assert!(waiter.await.unwrap());
        assert!(signal.pause(Duration::from_secs(60)).await);
    }
}
