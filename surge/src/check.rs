//! Named pass/fail assertions over responses.
//!
//! A failing check never aborts the iteration; it is recorded in the `checks` rate metric
//! (tagged with the check name) and reported back to the caller.
//!
//! ```rust
//! use surge::check::Checks;
//!
//! let status = 200;
//! let report = Checks::on(&status)
//!     .check("status is 200", |s| *s == 200)
//!     .check("not a redirect", |s| !(300..400).contains(s))
//!     .finish();
//! assert!(report.all_passed());
//! ```
use crate::error::CheckError;
use crate::vu;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use surge_core::metric_names::CHECKS;
use surge_core::MetricSample;
#[allow(unused)]
use tracing::{debug, error, trace, warn};

/// Anything a predicate may return.
pub trait CheckOutcome {
    fn into_check(self) -> Result<bool, String>;
}

impl CheckOutcome for bool {
    fn into_check(self) -> Result<bool, String> {
        Ok(self)
    }
}

impl<E: Display> CheckOutcome for Result<bool, E> {
    fn into_check(self) -> Result<bool, String> {
        self.map_err(|err| err.to_string())
    }
}

/// A reusable check predicate.
pub trait Predicate<T: ?Sized> {
    fn evaluate(&self, value: &T) -> Result<bool, String>;
}

impl<T, F, R> Predicate<T> for F
where
    T: ?Sized,
    F: Fn(&T) -> R,
    R: CheckOutcome,
{
    fn evaluate(&self, value: &T) -> Result<bool, String> {
        self(value).into_check()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    /// Set when the predicate errored or panicked rather than returning `false`.
    pub error: Option<String>,
}

/// Results of a batch of checks, in the order they were evaluated.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub results: Vec<CheckResult>,
}

impl CheckReport {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// Turns failed checks into an error, for scenarios that want a failed check to fail the
    /// iteration too.
    pub fn into_result(self) -> Result<(), CheckError> {
        let failed: Vec<_> = self
            .results
            .into_iter()
            .filter(|r| !r.passed)
            .map(|r| r.name)
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(CheckError::Failed(failed))
        }
    }
}

/// Builder evaluating several checks against one value.
#[must_use = "call `finish` to get the check report"]
pub struct Checks<'a, T: ?Sized> {
    value: &'a T,
    report: CheckReport,
}

impl<'a, T: ?Sized> Checks<'a, T> {
    pub fn on(value: &'a T) -> Self {
        Self {
            value,
            report: CheckReport::default(),
        }
    }

    pub fn check<F, R>(self, name: &str, predicate: F) -> Self
    where
        F: Fn(&T) -> R,
        R: CheckOutcome,
    {
        self.check_predicate(name, &predicate)
    }

    pub fn check_predicate(mut self, name: &str, predicate: &dyn Predicate<T>) -> Self {
        let result = evaluate(self.value, name, predicate);
        self.report.results.push(result);
        self
    }

    pub fn finish(self) -> CheckReport {
        self.report
    }
}

/// Evaluates a single named check, returning whether it passed.
pub fn check<T, F, R>(value: &T, name: &str, predicate: F) -> bool
where
    T: ?Sized,
    F: Fn(&T) -> R,
    R: CheckOutcome,
{
    evaluate(value, name, &predicate).passed
}

fn evaluate<T: ?Sized>(value: &T, name: &str, predicate: &dyn Predicate<T>) -> CheckResult {
    let outcome = match catch_unwind(AssertUnwindSafe(|| predicate.evaluate(value))) {
        Ok(outcome) => outcome,
        Err(payload) => Err(panic_message(payload)),
    };

    let result = match outcome {
        Ok(passed) => CheckResult {
            name: name.to_string(),
            passed,
            error: None,
        },
        Err(reason) => {
            let err = CheckError::Evaluation {
                name: name.to_string(),
                reason,
            };
            warn!("{err}");
            CheckResult {
                name: name.to_string(),
                passed: false,
                error: Some(err.to_string()),
            }
        }
    };

    if !result.passed {
        debug!("Check failed: {name}");
    }
    vu::emit(MetricSample::rate(CHECKS, result.passed).tag("check", name));

    result
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "predicate panicked".to_string()
    }
}
