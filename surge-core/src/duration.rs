//! Human readable durations (`"1s"`, `"2m"`, `"3h56m"`) for configuration files.
//!
//! Intended for `#[serde(with = "surge_core::duration")]`. Plain integers are accepted as
//! seconds when deserializing.
use crate::ConfigError;
use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn parse(input: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(input.trim()).map_err(|err| ConfigError::InvalidDuration {
        input: input.to_string(),
        reason: err.to_string(),
    })
}

pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&humantime::format_duration(*duration))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(u64),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => parse(&text).map_err(serde::de::Error::custom),
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
    }
}
