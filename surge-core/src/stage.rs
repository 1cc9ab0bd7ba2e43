use crate::{duration, ConfigError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// One leg of the ramp profile: reach `target` virtual users over `duration`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    #[serde(with = "duration")]
    pub duration: Duration,
    pub target: u32,
}

impl Stage {
    pub fn new(duration: Duration, target: u32) -> Self {
        Self { duration, target }
    }
}

/// Parses the compact `<duration>:<target>` form, e.g. `2m:400`.
impl FromStr for Stage {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (duration, target) = s
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::MalformedStage(s.to_string()))?;

        let duration = duration::parse(duration)?;
        let target = target
            .trim()
            .parse::<u32>()
            .map_err(|_| ConfigError::InvalidTarget(target.to_string()))?;

        Ok(Self { duration, target })
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            humantime::format_duration(self.duration),
            self.target
        )
    }
}

/// An immutable, validated sequence of stages.
///
/// The target concurrency at any elapsed time is the linear interpolation between the
/// previous stage's target (0 for the first stage) and the current stage's target, truncated
/// toward the previous target: ramp-ups round down, ramp-downs round up. Values are exact at
/// every stage boundary, and 0 once the last stage is over. A profile lasting zero seconds in
/// total may not target any users.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageProfile {
    stages: Arc<[Stage]>,
    total: Duration,
}

impl StageProfile {
    pub fn new(stages: Vec<Stage>) -> Result<Self, ConfigError> {
        let total = stages
            .iter()
            .try_fold(Duration::ZERO, |acc, stage| acc.checked_add(stage.duration))
            .ok_or_else(|| ConfigError::MalformedStage("total duration overflows".to_string()))?;

        let peak = stages.iter().map(|s| s.target).max().unwrap_or(0);
        if total.is_zero() && peak > 0 {
            return Err(ConfigError::ZeroLengthProfile(peak));
        }

        Ok(Self {
            stages: stages.into(),
            total,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        self.total
    }

    pub fn max_target(&self) -> u32 {
        self.stages.iter().map(|s| s.target).max().unwrap_or(0)
    }

    /// Index of the stage running at `elapsed`, if any.
    pub fn stage_index_at(&self, elapsed: Duration) -> Option<usize> {
        let mut end = Duration::ZERO;
        for (idx, stage) in self.stages.iter().enumerate() {
            end += stage.duration;
            if elapsed < end {
                return Some(idx);
            }
        }
        None
    }

    pub fn target_at(&self, elapsed: Duration) -> u32 {
        let mut start = Duration::ZERO;
        let mut from = 0;
        for stage in self.stages.iter() {
            let end = start + stage.duration;
            if elapsed < end {
                return interpolate(from, stage.target, elapsed - start, stage.duration);
            }
            start = end;
            from = stage.target;
        }

        match self.stages.last() {
            Some(last) if elapsed == self.total => last.target,
            _ => 0,
        }
    }
}

// NOTE: `span` is never zero here since `progress < span`. Integer division truncates toward
// zero, which is what keeps the count on the `from` side of the line.
fn interpolate(from: u32, to: u32, progress: Duration, span: Duration) -> u32 {
    let delta = (i128::from(to) - i128::from(from)) * progress.as_nanos() as i128;
    let step = delta / span.as_nanos() as i128;
    (i128::from(from) + step) as u32
}
