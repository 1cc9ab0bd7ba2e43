use crate::{
    duration, ConfigError, Stage, StageProfile, Threshold, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_ITERATION_PAUSE, DEFAULT_RPC_TIMEOUT, DEFAULT_SUMMARY_INTERVAL,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Transport options for a gRPC session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Skip TLS and speak h2c.
    pub plaintext: bool,
    /// Upper bound on establishing the connection, handshake included.
    #[serde(with = "duration")]
    pub timeout: Duration,
    /// Overrides the TLS server name, defaults to the host of the address.
    pub authority: Option<String>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            plaintext: false,
            timeout: DEFAULT_CONNECT_TIMEOUT,
            authority: None,
        }
    }
}

impl ConnectOptions {
    pub fn plaintext() -> Self {
        Self {
            plaintext: true,
            ..Self::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Run-wide options. Built once, then shared immutably by the scheduler and every
/// virtual user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub name: String,
    pub stages: Vec<Stage>,
    #[serde(with = "duration")]
    pub iteration_pause: Duration,
    #[serde(with = "duration")]
    pub rpc_timeout: Duration,
    /// Address of the system under test, `host:port`.
    pub target: Option<String>,
    pub connect: ConnectOptions,
    /// Metric selector to threshold expressions, e.g. `"grpc_req_duration": ["p(95)<500"]`.
    pub thresholds: BTreeMap<String, Vec<String>>,
    #[serde(with = "duration")]
    pub summary_interval: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

impl ScenarioConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stages: vec![],
            iteration_pause: DEFAULT_ITERATION_PAUSE,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            target: None,
            connect: ConnectOptions::default(),
            thresholds: BTreeMap::new(),
            summary_interval: DEFAULT_SUMMARY_INTERVAL,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|err| ConfigError::Load(err.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Load(format!("{}: {err}", path.display())))?;
        Self::from_json(&contents)
    }

    pub fn add_threshold(&mut self, selector: &str, expression: &str) {
        self.thresholds
            .entry(selector.to_string())
            .or_default()
            .push(expression.to_string());
    }

    pub fn profile(&self) -> Result<StageProfile, ConfigError> {
        StageProfile::new(self.stages.clone())
    }

    pub fn parsed_thresholds(&self) -> Result<Vec<Threshold>, ConfigError> {
        self.thresholds
            .iter()
            .flat_map(|(selector, expressions)| {
                expressions
                    .iter()
                    .map(move |expr| Threshold::parse(selector, expr))
            })
            .collect()
    }

    /// Checks everything that can be checked before a virtual user starts.
    pub fn validate(&self) -> Result<(StageProfile, Vec<Threshold>), ConfigError> {
        if let Some(target) = &self.target {
            validate_address(target)?;
        }
        Ok((self.profile()?, self.parsed_thresholds()?))
    }
}

/// Accepts `host:port`, optionally prefixed with `http://` or `https://`.
pub fn validate_address(address: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let bare = address
        .strip_prefix("http://")
        .or_else(|| address.strip_prefix("https://"))
        .unwrap_or(address);

    let (host, port) = bare.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    if host.contains(|c: char| c.is_whitespace() || c == '/') {
        return Err(invalid("host contains invalid characters"));
    }
    port.parse::<u16>().map_err(|_| invalid("port is not a number"))?;
    Ok(())
}
