//! Command line overrides for a scenario's configuration. (requires `cli` feature)
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use surge_core::{duration, validate_address, ConfigError, ScenarioConfig, Stage, Threshold};

/// Flags are layered over the scenario's built-in configuration: a `--config` file replaces
/// it first (keeping the name), then individual flags override single fields.
#[derive(Parser, Debug, Default)]
#[command(version, about = "Stage-driven gRPC load driver")]
pub struct ScenarioArgs {
    /// JSON configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Stage as `<duration>:<target>`, e.g. `2m:400`. Repeatable; replaces the configured stages.
    #[arg(short, long = "stage")]
    pub stages: Vec<Stage>,

    /// Address of the service under test, `host:port`.
    #[arg(short, long)]
    pub target: Option<String>,

    /// Connect without TLS.
    #[arg(long)]
    pub plaintext: bool,

    /// Pause between iterations.
    #[arg(long, value_parser = duration::parse)]
    pub pause: Option<Duration>,

    #[arg(long, value_parser = duration::parse)]
    pub rpc_timeout: Option<Duration>,

    /// Threshold as `<metric>=<expression>`, e.g. `grpc_req_duration=p(95)<500`. Repeatable.
    #[arg(long = "threshold")]
    pub thresholds: Vec<String>,

    #[arg(long, value_parser = duration::parse)]
    pub summary_interval: Option<Duration>,
}

impl ScenarioArgs {
    pub fn apply(self, config: ScenarioConfig) -> Result<ScenarioConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ScenarioConfig {
                name: config.name,
                ..ScenarioConfig::from_file(path)?
            },
            None => config,
        };

        if !self.stages.is_empty() {
            config.stages = self.stages;
        }
        if let Some(target) = self.target {
            validate_address(&target)?;
            config.target = Some(target);
        }
        if self.plaintext {
            config.connect.plaintext = true;
        }
        if let Some(pause) = self.pause {
            config.iteration_pause = pause;
        }
        if let Some(timeout) = self.rpc_timeout {
            config.rpc_timeout = timeout;
        }
        if let Some(interval) = self.summary_interval {
            config.summary_interval = interval;
        }
        for pair in self.thresholds.iter().map(String::as_str) {
            let (selector, expression) = Threshold::split_pair(pair)?;
            let threshold = Threshold::parse(selector, expression)?;
            tracing::debug!("Adding threshold {threshold}");
            config.add_threshold(selector, expression);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ScenarioArgs {
        ScenarioArgs::try_parse_from(std::iter::once("surge").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn flags_override_builder_defaults() {
        let args = parse(&[
            "--stage",
            "10s:2",
            "--stage",
            "10s:0",
            "--target",
            "localhost:3000",
            "--plaintext",
            "--pause",
            "500ms",
            "--threshold",
            "checks=rate>0.99",
        ]);

        let config = args.apply(ScenarioConfig::new("hello")).unwrap();
        assert_eq!(config.name, "hello");
        assert_eq!(
            config.stages,
            [
                Stage::new(Duration::from_secs(10), 2),
                Stage::new(Duration::from_secs(10), 0)
            ]
        );
        assert_eq!(config.target.as_deref(), Some("localhost:3000"));
        assert!(config.connect.plaintext);
        assert_eq!(config.iteration_pause, Duration::from_millis(500));
        assert_eq!(config.thresholds["checks"], ["rate>0.99"]);
    }

    #[test]
    fn untouched_fields_keep_their_values() {
        let mut base = ScenarioConfig::new("hello");
        base.stages = vec![Stage::new(Duration::from_secs(1), 1)];
        let config = parse(&[]).apply(base.clone()).unwrap();
        assert_eq!(config, base);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(ScenarioArgs::try_parse_from(["surge", "--stage", "2m"]).is_err());
        assert!(ScenarioArgs::try_parse_from(["surge", "--pause", "soon"]).is_err());

        let args = parse(&["--threshold", "checks"]);
        assert!(matches!(
            args.apply(ScenarioConfig::new("x")),
            Err(ConfigError::InvalidThreshold { .. })
        ));

        let args = parse(&["--target", "nowhere"]);
        assert!(matches!(
            args.apply(ScenarioConfig::new("x")),
            Err(ConfigError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn threshold_flags_are_trimmed_once() {
        let args = parse(&["--threshold", "checks{check:status is OK} = rate>0.99"]);
        let config = args.apply(ScenarioConfig::new("x")).unwrap();
        assert_eq!(config.thresholds["checks{check:status is OK}"], ["rate>0.99"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_is_a_load_error() {
        let args = parse(&["--config", "/definitely/not/here.json"]);
        assert!(matches!(
            args.apply(ScenarioConfig::new("x")),
            Err(ConfigError::Load(_))
        ));
    }
}
