//! Assertions on probe results.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::executor::ProbeResult;

const OUTPUT_SNIPPET: usize = 240;

/// One condition a probe result must satisfy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Expectation {
    /// Exact exit code.
    ExitCode(i64),
    /// Exit code 0.
    Success,
    /// Any non-zero exit code.
    Failure,
    /// The output contains the text.
    Contains(String),
    /// The output does not contain the text.
    NotContains(String),
}

impl Expectation {
    /// Output must contain `text`.
    pub fn contains(text: impl Into<String>) -> Self {
        Expectation::Contains(text.into())
    }

    /// Output must not contain `text`.
    pub fn not_contains(text: impl Into<String>) -> Self {
        Expectation::NotContains(text.into())
    }

    /// Checks the probe, returning a description of the mismatch.
    pub fn check(&self, probe: &ProbeResult) -> Result<(), String> {
        let ok = match self {
            Expectation::ExitCode(code) => probe.exit_code == *code,
            Expectation::Success => probe.success(),
            Expectation::Failure => !probe.success(),
            Expectation::Contains(text) => probe.contains(text),
            Expectation::NotContains(text) => !probe.contains(text),
        };
        if ok {
            return Ok(());
        }

        Err(match self {
            Expectation::ExitCode(_) | Expectation::Success | Expectation::Failure => {
                format!("expected {}, got exit code {}", self, probe.exit_code)
            }
            Expectation::Contains(_) | Expectation::NotContains(_) => format!(
                "expected output that {}, got: {:?}",
                self,
                probe.output_tail(OUTPUT_SNIPPET)
            ),
        })
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::ExitCode(code) => write!(f, "exit code {}", code),
            Expectation::Success => f.write_str("exit code 0"),
            Expectation::Failure => f.write_str("a non-zero exit code"),
            Expectation::Contains(text) => write!(f, "contains {:?}", text),
            Expectation::NotContains(text) => write!(f, "does not contain {:?}", text),
        }
    }
}

/// Checks every expectation and joins all mismatches.
pub fn check_all(expectations: &[Expectation], probe: &ProbeResult) -> Result<(), String> {
    let failures: Vec<String> = expectations
        .iter()
        .filter_map(|e| e.check(probe).err())
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.join("; "))
    }
}
