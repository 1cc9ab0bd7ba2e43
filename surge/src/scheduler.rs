//! Keeps the number of live virtual users in line with the stage profile.
use crate::vu::{IterationOutcome, RunContext, VirtualUser};
use std::future::Future;
use surge_core::metric_names::{VUS, VUS_MAX};
use surge_core::MetricSample;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

mod timer;

pub(crate) use timer::Timer;

pub(crate) struct StageScheduler<T> {
    scenario: T,
    ctx: RunContext,
    active: Vec<VirtualUser>,
    retiring: Vec<VirtualUser>,
    next_id: u64,
    max_vus: u32,
}

impl<T, F, R> StageScheduler<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = R> + Send + 'static,
    R: IterationOutcome + Send + 'static,
{
    pub fn new(scenario: T, ctx: RunContext) -> Self {
        Self {
            scenario,
            ctx,
            active: vec![],
            retiring: vec![],
            next_id: 1,
            max_vus: 0,
        }
    }

    /// Starts or retires users until `target` are live. Retired users finish their current
    /// iteration first; the most recently started are retired first.
    pub fn reconcile(&mut self, target: u32) {
        self.reap();

        let target = target as usize;
        if self.active.len() < target {
            let count = target - self.active.len();
            trace!("Starting {count} virtual users");
            for _ in 0..count {
                let id = self.next_id;
                self.next_id += 1;
                self.active
                    .push(VirtualUser::spawn(id, self.scenario.clone(), self.ctx.clone()));
            }
        } else if self.active.len() > target {
            trace!("Retiring {} virtual users", self.active.len() - target);
            while self.active.len() > target {
                if let Some(user) = self.active.pop() {
                    user.stop();
                    self.retiring.push(user);
                }
            }
        }

        self.max_vus = self.max_vus.max(self.active.len() as u32);
        self.ctx
            .metrics
            .record(MetricSample::gauge(VUS, self.active.len() as f64));
        self.ctx
            .metrics
            .record(MetricSample::gauge(VUS_MAX, self.max_vus as f64));
    }

    /// Users that are currently running iterations, excluding retiring ones.
    pub fn live(&self) -> usize {
        self.active.len()
    }

    pub fn max_vus(&self) -> u32 {
        self.max_vus
    }

    fn reap(&mut self) {
        let before = self.retiring.len();
        self.retiring.retain(|user| !user.is_finished());
        let reaped = before - self.retiring.len();
        if reaped > 0 {
            trace!("Reaped {reaped} retired virtual users");
        }
    }

    /// Stops every user and waits for all in-flight iterations to complete.
    pub async fn shutdown(mut self) {
        self.reconcile(0);
        debug!("Waiting on {} retiring virtual users", self.retiring.len());
        for user in self.retiring.drain(..) {
            user.join().await;
        }
    }
}
