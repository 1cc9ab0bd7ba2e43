//! Scenario logic and configuration
use crate::aggregator::Aggregator;
use crate::error::ScenarioError;
use crate::scheduler::{StageScheduler, Timer};
use crate::summary;
use crate::vu::{IterationOutcome, RunContext};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use surge_core::{ConfigError, ConnectOptions, RunStatistics, ScenarioConfig, Stage, SCHEDULER_INTERVAL};
use tokio::time::Instant;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

pub type ScenarioResult = Result<RunStatistics, ScenarioError>;

/// Load test scenario structure
///
/// Handler for running scenarios. Not intended for manual creation, use the
/// [`#[scenario]`](surge_macros::scenario) macro which will add these methods to functions.
#[pin_project::pin_project]
pub struct Scenario<T> {
    func: T,
    runner_fut: Option<Pin<Box<dyn Future<Output = ScenarioResult> + Send>>>,
    config: ScenarioConfig,
    config_error: Option<ConfigError>,
}

impl<T> Scenario<T> {
    #[doc(hidden)]
    pub fn new(name: &str, func: T) -> Self {
        Self {
            func,
            runner_fut: None,
            config: ScenarioConfig::new(name),
            config_error: None,
        }
    }

    /// Replaces the whole configuration, keeping the scenario's name.
    pub fn config(mut self, config: ScenarioConfig) -> Self {
        let name = std::mem::take(&mut self.config.name);
        self.config = ScenarioConfig { name, ..config };
        self
    }

    pub fn current_config(&self) -> &ScenarioConfig {
        &self.config
    }
}

impl<T, F, R> Future for Scenario<T>
where
    T: Fn() -> F + Send + 'static + Clone + Sync,
    F: Future<Output = R> + Send + 'static,
    R: IterationOutcome + Send + 'static,
{
    type Output = ScenarioResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.runner_fut.is_none() {
            let func = self.func.clone();
            let config = self.config.clone();
            let config_error = self.config_error.take();
            self.runner_fut = Some(Box::pin(async move {
                if let Some(err) = config_error {
                    return Err(err.into());
                }
                run_scenario(func, config).await
            }));
        }

        if let Some(runner) = &mut self.runner_fut {
            runner.as_mut().poll(cx)
        } else {
            unreachable!()
        }
    }
}

pub trait ConfigurableScenario<T: Send>: Future<Output = T> + Sized + Send {
    fn stages(self, stages: impl IntoIterator<Item = Stage>) -> Self;
    fn stage(self, duration: Duration, target: u32) -> Self;
    fn target(self, address: &str) -> Self;
    fn connect_options(self, options: ConnectOptions) -> Self;
    fn plaintext(self) -> Self;
    fn iteration_pause(self, pause: Duration) -> Self;
    fn rpc_timeout(self, timeout: Duration) -> Self;
    fn threshold(self, metric: &str, expression: &str) -> Self;
    fn summary_interval(self, interval: Duration) -> Self;

    #[cfg(feature = "cli")]
    #[cfg_attr(docsrs, doc(cfg(feature = "cli")))]
    fn with_args(self) -> Self;
}

impl<T, F, R> ConfigurableScenario<ScenarioResult> for Scenario<T>
where
    T: Fn() -> F + Send + 'static + Clone + Sync,
    F: Future<Output = R> + Send + 'static,
    R: IterationOutcome + Send + 'static,
{
    /// Replace the stage profile.
    ///
    /// # Example
    /// ```no_run
    /// use surge::prelude::*;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let stats = my_scenario()
    ///         .stages([
    ///             Stage::new(Duration::from_secs(120), 400),
    ///             Stage::new(Duration::from_secs(60), 0),
    ///         ])
    ///         .await
    ///         .unwrap();
    ///     println!("{stats}");
    /// }
    ///
    /// #[scenario]
    /// async fn my_scenario() {
    /// }
    /// ```
    fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.config.stages = stages.into_iter().collect();
        self
    }

    /// Append a stage ramping linearly to `target` users over `duration`.
    ///
    /// # Example
    /// ```no_run
    /// use surge::prelude::*;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     my_scenario()
    ///         .stage(Duration::from_secs(10), 2)
    ///         .stage(Duration::from_secs(10), 0)
    ///         .await
    ///         .unwrap();
    /// }
    ///
    /// #[scenario]
    /// async fn my_scenario() {
    /// }
    /// ```
    fn stage(mut self, duration: Duration, target: u32) -> Self {
        self.config.stages.push(Stage::new(duration, target));
        self
    }

    /// Address of the service under test, used by [`Client::connect_to_target`](crate::grpc::Client::connect_to_target).
    fn target(mut self, address: &str) -> Self {
        if let Err(err) = surge_core::validate_address(address) {
            self.config_error.get_or_insert(err);
        }
        self.config.target = Some(address.to_string());
        self
    }

    fn connect_options(mut self, options: ConnectOptions) -> Self {
        self.config.connect = options;
        self
    }

    /// Connect without TLS.
    fn plaintext(mut self) -> Self {
        self.config.connect.plaintext = true;
        self
    }

    /// Time each virtual user sleeps between iterations.
    fn iteration_pause(mut self, pause: Duration) -> Self {
        self.config.iteration_pause = pause;
        self
    }

    fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.config.rpc_timeout = timeout;
        self
    }

    /// Add a pass/fail criterion, e.g. `.threshold("grpc_req_duration", "p(95)<500")`.
    ///
    /// # Example
    /// ```no_run
    /// use surge::prelude::*;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let stats = my_scenario()
    ///         .stage(Duration::from_secs(30), 10)
    ///         .threshold("checks{check:status is OK}", "rate>0.99")
    ///         .await
    ///         .unwrap();
    ///     std::process::exit(stats.exit_code());
    /// }
    ///
    /// #[scenario]
    /// async fn my_scenario() {
    /// }
    /// ```
    fn threshold(mut self, metric: &str, expression: &str) -> Self {
        self.config.add_threshold(metric, expression);
        self
    }

    fn summary_interval(mut self, interval: Duration) -> Self {
        self.config.summary_interval = interval;
        self
    }

    /// Apply command line flags on top of the current configuration.
    #[cfg(feature = "cli")]
    fn with_args(mut self) -> Self {
        use clap::Parser;

        let args = crate::cli::ScenarioArgs::parse();
        match args.apply(self.config.clone()) {
            Ok(config) => self.config = config,
            Err(err) => {
                self.config_error.get_or_insert(err);
            }
        }
        self
    }
}

#[instrument(name="scenario", skip_all, fields(name=config.name))]
pub(crate) async fn run_scenario<T, F, R>(scenario: T, config: ScenarioConfig) -> ScenarioResult
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = R> + Send + 'static,
    R: IterationOutcome + Send + 'static,
{
    let (profile, thresholds) = config.validate()?;
    info!(
        "Running {} over {} stages ({})",
        config.name,
        profile.stages().len(),
        humantime::format_duration(profile.total_duration())
    );
    debug!("Config: {config:?}");

    let metrics = Aggregator::with_submetrics(
        thresholds
            .iter()
            .filter(|t| !t.tags.is_empty())
            .map(|t| (t.metric.clone(), t.tags.clone())),
    );
    let summary_interval = config.summary_interval;
    let name = config.name.clone();
    let ctx = RunContext::new(config, metrics);

    let mut scheduler = StageScheduler::new(scenario, ctx.clone());
    let total = profile.total_duration();
    let start = Instant::now();
    let mut last_summary = start;
    let mut timer = Timer::new(SCHEDULER_INTERVAL).await;
    trace!("Scheduler ticking every {timer}");

    // NOTE: An empty profile has a total of zero; the first pass sees elapsed == 0, which
    // reconciles to zero users.
    loop {
        let elapsed = start.elapsed();
        if elapsed > total {
            break;
        }

        let target = profile.target_at(elapsed);
        if target as usize != scheduler.live() {
            debug!("Target {target} VUs at {elapsed:?}");
        }
        scheduler.reconcile(target);

        if last_summary.elapsed() >= summary_interval {
            last_summary = Instant::now();
            info!(
                "{}",
                summary::progress_line(&ctx.metrics, elapsed, total, scheduler.live())
            );
        }

        timer.tick().await;
    }

    let max_vus = scheduler.max_vus();
    scheduler.shutdown().await;
    let elapsed = start.elapsed();

    let stats = summary::summarize(&name, &ctx.metrics, &thresholds, elapsed, max_vus);
    info!("Scenario complete");
    if !stats.passed() {
        warn!("Some thresholds have failed");
    }
    Ok(stats)
}
