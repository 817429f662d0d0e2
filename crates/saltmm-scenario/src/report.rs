//! Scenario and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

use crate::error::Result;
use crate::transport::Transport;

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Position in the scenario, starting at 1.
    pub index: usize,

    /// Human-readable step description.
    pub description: String,

    /// Host the step ran on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Command line the step ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Exit code of the last execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,

    /// Tail of the output of the last execution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Executions, more than one for readiness waits.
    pub attempts: u32,

    /// Wall time in milliseconds.
    pub duration_ms: u64,

    /// Failure message, if the step failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepReport {
    /// Returns true if the step passed.
    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of one scenario on one transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Scenario name.
    pub scenario: String,

    /// Transport the cluster ran with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<Transport>,

    /// Start time.
    pub started_at: DateTime<Utc>,

    /// Wall time in milliseconds, setup and teardown excluded.
    pub duration_ms: u64,

    /// Steps that ran, in order. Steps after a failure are not run.
    pub steps: Vec<StepReport>,

    /// Failure message for the scenario, when it failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Tail of each host's container output, kept for failed scenarios.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub logs: BTreeMap<String, String>,
}

impl ScenarioReport {
    /// Creates an empty report starting now.
    pub fn new(scenario: impl Into<String>) -> Self {
        Self {
            scenario: scenario.into(),
            transport: None,
            started_at: Utc::now(),
            duration_ms: 0,
            steps: Vec::new(),
            error: None,
            logs: BTreeMap::new(),
        }
    }

    /// Report for a scenario whose cluster could not be brought up.
    pub fn setup_failed(scenario: impl Into<String>, transport: Transport, error: impl ToString) -> Self {
        let mut report = Self::new(scenario);
        report.transport = Some(transport);
        report.error = Some(format!("setup failed: {}", error.to_string()));
        report
    }

    /// Returns true if every step passed and setup succeeded.
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.steps.iter().all(StepReport::passed)
    }

    /// Returns the first failed step.
    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps.iter().find(|s| !s.passed())
    }
}

/// Results of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run ID.
    pub run_id: Uuid,

    /// Backend the run used.
    pub backend: String,

    /// Start time.
    pub started_at: DateTime<Utc>,

    /// End time, set by [`RunReport::finish`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Scenario outcomes in run order.
    pub scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    /// Starts a run report.
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            backend: backend.into(),
            started_at: Utc::now(),
            finished_at: None,
            scenarios: Vec::new(),
        }
    }

    /// Adds a scenario outcome.
    pub fn push(&mut self, report: ScenarioReport) {
        self.scenarios.push(report);
    }

    /// Marks the run finished.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Returns true if every scenario passed.
    pub fn passed(&self) -> bool {
        self.scenarios.iter().all(ScenarioReport::passed)
    }

    /// Number of passed scenarios.
    pub fn passed_count(&self) -> usize {
        self.scenarios.iter().filter(|s| s.passed()).count()
    }

    /// Number of failed scenarios.
    pub fn failed_count(&self) -> usize {
        self.scenarios.len() - self.passed_count()
    }

    /// One line per scenario plus a total.
    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self
            .scenarios
            .iter()
            .map(|s| {
                let transport = s.transport.map(|t| t.as_str()).unwrap_or("-");
                let status = if s.passed() { "PASS" } else { "FAIL" };
                let mut line = format!("{} {:<7} {} ({} ms)", status, transport, s.scenario, s.duration_ms);
                if let Some(err) = s.error.as_ref() {
                    line.push_str(&format!(": {}", err));
                }
                line
            })
            .collect();
        lines.push(format!(
            "{} passed, {} failed",
            self.passed_count(),
            self.failed_count()
        ));
        lines.join("\n")
    }

    /// Serializes the report as pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the report as JSON, creating parent directories.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}
