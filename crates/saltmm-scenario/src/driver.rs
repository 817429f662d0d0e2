//! Runs scenarios step by step.

use std::time::Instant;

use tracing::{error, info, warn};

use crate::error::ScenarioError;
use crate::executor::{HostExecutor, ProbeResult};
use crate::expect::check_all;
use crate::report::{ScenarioReport, StepReport};
use crate::scenario::{Scenario, Step};
use crate::wait::{eventually, ReadinessPolicy};

const OUTPUT_TAIL: usize = 400;

/// Executes the steps of a scenario against a deployed cluster.
#[derive(Debug, Clone)]
pub struct ScenarioDriver {
    executor: HostExecutor,
    policy: ReadinessPolicy,
}

struct StepOutcome {
    probe: Option<ProbeResult>,
    attempts: u32,
    error: Option<ScenarioError>,
}

impl StepOutcome {
    fn none() -> Self {
        Self {
            probe: None,
            attempts: 0,
            error: None,
        }
    }

    fn once(probe: ProbeResult) -> Self {
        Self {
            probe: Some(probe),
            attempts: 1,
            error: None,
        }
    }

    fn failed(error: ScenarioError) -> Self {
        Self {
            probe: None,
            attempts: 0,
            error: Some(error),
        }
    }

    fn with_error(mut self, error: ScenarioError) -> Self {
        self.error = Some(error);
        self
    }
}

impl ScenarioDriver {
    /// Creates a driver.
    pub fn new(executor: HostExecutor, policy: ReadinessPolicy) -> Self {
        Self { executor, policy }
    }

    /// Returns the readiness policy.
    pub fn policy(&self) -> &ReadinessPolicy {
        &self.policy
    }

    /// Runs every step in order, stopping at the first failure.
    ///
    /// Failures are recorded in the report rather than returned, so the
    /// caller can always tear the cluster down afterwards.
    pub async fn run(&self, scenario: &Scenario) -> ScenarioReport {
        let mut report = ScenarioReport::new(&scenario.name);
        let started = Instant::now();

        info!(scenario = %scenario.name, steps = scenario.len(), "Running scenario");

        for (i, step) in scenario.steps.iter().enumerate() {
            let index = i + 1;
            let step_started = Instant::now();
            info!(scenario = %scenario.name, step = index, "{}", step);

            let outcome = self.run_step(index, step).await;

            let step_report = StepReport {
                index,
                description: step.to_string(),
                host: step.host().map(|h| h.to_string()),
                command: step.command(),
                exit_code: outcome.probe.as_ref().map(|p| p.exit_code),
                output: outcome.probe.as_ref().map(|p| p.output_tail(OUTPUT_TAIL)),
                attempts: outcome.attempts,
                duration_ms: step_started.elapsed().as_millis() as u64,
                error: outcome.error.as_ref().map(ToString::to_string),
            };
            report.steps.push(step_report);

            if let Some(e) = outcome.error {
                error!(scenario = %scenario.name, step = index, error = %e, "Step failed");
                report.error = Some(e.to_string());
                break;
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;

        if report.passed() {
            info!(scenario = %scenario.name, duration_ms = report.duration_ms, "Scenario passed");
        } else {
            warn!(scenario = %scenario.name, duration_ms = report.duration_ms, "Scenario failed");
        }

        report
    }

    async fn run_step(&self, index: usize, step: &Step) -> StepOutcome {
        match step {
            Step::Kill {
                host,
                signal,
                require_success,
            } => {
                let command = host.daemon().stop_command(*signal);
                let probe = match self.executor.exec(*host, &command).await {
                    Ok(probe) => probe,
                    Err(e) => return StepOutcome::failed(e),
                };
                if *require_success && !probe.success() {
                    let detail = format!(
                        "no {} process was signalled (exit code {})",
                        host.daemon(),
                        probe.exit_code
                    );
                    return StepOutcome::once(probe).with_error(ScenarioError::assertion_failed(
                        index,
                        host.as_str(),
                        command,
                        detail,
                    ));
                }
                StepOutcome::once(probe)
            }
            Step::Start { host } => {
                let command = host.daemon().start_command();
                let probe = match self.executor.exec(*host, &command).await {
                    Ok(probe) => probe,
                    Err(e) => return StepOutcome::failed(e),
                };
                if !probe.success() {
                    let detail = format!(
                        "daemon failed to start (exit code {}): {}",
                        probe.exit_code,
                        probe.output_tail(OUTPUT_TAIL)
                    );
                    return StepOutcome::once(probe).with_error(ScenarioError::assertion_failed(
                        index,
                        host.as_str(),
                        command,
                        detail,
                    ));
                }
                StepOutcome::once(probe)
            }
            Step::Hold(duration) => {
                info!(secs = duration.as_secs(), "Holding");
                tokio::time::sleep(*duration).await;
                StepOutcome::none()
            }
            Step::Probe {
                host,
                command,
                expect,
            } => {
                let probe = match self.executor.exec(*host, command).await {
                    Ok(probe) => probe,
                    Err(e) => return StepOutcome::failed(e),
                };
                match check_all(expect, &probe) {
                    Ok(()) => StepOutcome::once(probe),
                    Err(detail) => StepOutcome::once(probe).with_error(
                        ScenarioError::assertion_failed(index, host.as_str(), command.as_str(), detail),
                    ),
                }
            }
            Step::AwaitReady {
                host,
                command,
                expect,
            } => match eventually(&self.executor, *host, command, expect, &self.policy).await {
                Ok(ready) => StepOutcome {
                    probe: Some(ready.probe),
                    attempts: ready.attempts,
                    error: None,
                },
                Err(e) => StepOutcome::failed(e),
            },
        }
    }
}
