use std::any::Any;
use std::error::Error as StdError;
use std::time::Duration;
use surge_core::ConfigError;
use thiserror::Error;
use tonic::Code;

/// Failures establishing a session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] ConfigError),

    #[error("No target address configured.")]
    NoTarget,

    #[error("Session is already connected to {0}.")]
    AlreadyConnected(String),

    #[error("Timed out connecting to {address} after {}", format_timeout(.timeout))]
    Timeout { address: String, timeout: Duration },

    #[error("Unable to connect to {address}: {source}")]
    Transport {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Operations that are not valid in the session's current state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("Session is not connected.")]
    NotConnected,

    #[error("Session is closed.")]
    Closed,
}

/// Failures of a single call.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("{method} timed out after {}", format_timeout(.timeout))]
    Timeout { method: String, timeout: Duration },

    #[error("{method} failed at the transport level: {message}")]
    Reset { method: String, message: String },

    #[error("{method} returned {code:?}: {message}")]
    Status {
        method: String,
        code: Code,
        message: String,
    },

    #[error("Invalid method name `{0}`")]
    InvalidMethod(String),

    #[error(transparent)]
    State(#[from] StateError),
}

impl RpcError {
    /// The gRPC status code that best describes this failure.
    pub fn code(&self) -> Code {
        match self {
            RpcError::Timeout { .. } => Code::DeadlineExceeded,
            RpcError::Reset { .. } => Code::Unavailable,
            RpcError::Status { code, .. } => *code,
            RpcError::InvalidMethod(_) => Code::InvalidArgument,
            RpcError::State(_) => Code::FailedPrecondition,
        }
    }
}

/// A check whose predicate could not be evaluated, or a set of checks that did not pass.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckError {
    #[error("Check `{name}` could not be evaluated: {reason}")]
    Evaluation { name: String, reason: String },

    #[error("Checks failed: {}", join_names(.0))]
    Failed(Vec<String>),
}

/// Everything an iteration can fail with. Caught by the iteration executor and turned into
/// metrics; never propagated further.
#[derive(Debug, Error)]
pub enum IterationError {
    #[error(transparent)]
    Connection(ConnectionError),

    #[error(transparent)]
    Rpc(RpcError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Check(#[from] CheckError),

    #[error("{0}")]
    Other(Box<dyn StdError + Send + Sync>),

    #[error("Iteration panicked: {0}")]
    Panic(String),
}

impl From<ConnectionError> for IterationError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::State(state) => IterationError::State(state),
            other => IterationError::Connection(other),
        }
    }
}

impl From<RpcError> for IterationError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::State(state) => IterationError::State(state),
            other => IterationError::Rpc(other),
        }
    }
}

impl IterationError {
    /// Short label used to tag error metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            IterationError::Connection(_) => "connection",
            IterationError::Rpc(_) => "rpc",
            IterationError::State(_) => "state",
            IterationError::Check(_) => "check",
            IterationError::Other(_) => "other",
            IterationError::Panic(_) => "panic",
        }
    }

    /// Recovers the concrete error kind from a boxed error where possible.
    pub(crate) fn from_boxed(err: Box<dyn StdError + Send + Sync>) -> Self {
        let err = match err.downcast::<IterationError>() {
            Ok(err) => return *err,
            Err(err) => err,
        };
        let err = match err.downcast::<ConnectionError>() {
            Ok(err) => return (*err).into(),
            Err(err) => err,
        };
        let err = match err.downcast::<RpcError>() {
            Ok(err) => return (*err).into(),
            Err(err) => err,
        };
        let err = match err.downcast::<StateError>() {
            Ok(err) => return (*err).into(),
            Err(err) => err,
        };
        match err.downcast::<CheckError>() {
            Ok(err) => (*err).into(),
            Err(err) => IterationError::Other(err),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        IterationError::Panic(message)
    }
}

fn format_timeout(timeout: &Duration) -> String {
    humantime::format_duration(*timeout).to_string()
}

fn join_names(names: &[String]) -> String {
    names.join(", ")
}

/// Errors that stop a scenario from running at all.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
