use std::time::Duration;

/// How often the stage scheduler reconciles live virtual users with the target.
pub const SCHEDULER_INTERVAL: Duration = Duration::from_millis(100);

/// The default pause between two iterations of the same virtual user.
pub const DEFAULT_ITERATION_PAUSE: Duration = Duration::from_secs(1);

/// The default bound on a single RPC.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(60);

/// The default bound on connection establishment (including the handshake).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// The default period between two progress summaries.
pub const DEFAULT_SUMMARY_INTERVAL: Duration = Duration::from_secs(10);

/// Exit code used when at least one threshold failed.
pub const THRESHOLDS_FAILED_EXIT_CODE: i32 = 99;

/// Built-in metric names.
pub mod metric_names {
    pub const VUS: &str = "vus";
    pub const VUS_MAX: &str = "vus_max";
    pub const ITERATIONS: &str = "iterations";
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const ITERATION_FAILED: &str = "iteration_failed";
    pub const ITERATION_ERRORS: &str = "iteration_errors";
    pub const CHECKS: &str = "checks";
    pub const GRPC_REQS: &str = "grpc_reqs";
    pub const GRPC_REQ_DURATION: &str = "grpc_req_duration";
}
