#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

pub mod aggregator;
pub mod check;
pub mod error;
pub mod grpc;
pub mod scenario;
pub mod vu;

#[cfg(feature = "cli")]
#[cfg_attr(docsrs, doc(cfg(feature = "cli")))]
pub mod cli;

pub(crate) mod scheduler;
pub(crate) mod summary;

pub use scenario::Scenario;
pub use surge_core::{
    ConfigError, ConnectOptions, MetricKind, MetricSample, MetricSummary, RunStatistics,
    ScenarioConfig, Stage, StageProfile, Tags, Threshold,
};
pub use surge_macros::scenario;

pub mod prelude {
    pub use crate::check::{check, Checks};
    pub use crate::grpc::Client;
    pub use crate::scenario::ConfigurableScenario;
    pub use surge_core::{ConnectOptions, RunStatistics, Stage};
    pub use surge_macros::scenario;
}
