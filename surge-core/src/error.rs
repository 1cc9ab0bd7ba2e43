use thiserror::Error;

/// Problems found while building a scenario configuration. These are reported before any
/// virtual user is started.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid stage `{0}`: expected `<duration>:<target>`")]
    MalformedStage(String),

    #[error("Invalid duration `{input}`: {reason}")]
    InvalidDuration { input: String, reason: String },

    #[error("Stages last zero seconds in total but target up to {0} VUs")]
    ZeroLengthProfile(u32),

    #[error("Invalid stage target `{0}`")]
    InvalidTarget(String),

    #[error("Invalid target address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Invalid threshold `{input}`: {reason}")]
    InvalidThreshold { input: String, reason: String },

    #[error("Unable to read configuration: {0}")]
    Load(String),
}
