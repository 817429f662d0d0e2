//! Scenario and step definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::expect::Expectation;
use crate::host::SaltHost;
use crate::salt::{SaltCommand, Signal, MASTER_NOT_RESPONDING};

/// One action of a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Signal the host's daemon with `pkill`.
    Kill {
        /// Target host.
        host: SaltHost,
        /// Signal to send.
        signal: Signal,
        /// Fail the step unless `pkill` exits 0.
        require_success: bool,
    },

    /// Start the host's daemon in the background. Must exit 0.
    Start {
        /// Target host.
        host: SaltHost,
    },

    /// Wait on purpose, doing nothing.
    Hold(Duration),

    /// Run a command once and check the result.
    Probe {
        /// Host to run on.
        host: SaltHost,
        /// Command line.
        command: String,
        /// Conditions on the result.
        expect: Vec<Expectation>,
    },

    /// Re-run a command until the result passes or readiness times out.
    AwaitReady {
        /// Host to run on.
        host: SaltHost,
        /// Command line.
        command: String,
        /// Conditions on the result.
        expect: Vec<Expectation>,
    },
}

impl Step {
    /// `pkill` the host's daemon, ignoring the exit code.
    pub fn kill(host: SaltHost) -> Self {
        Step::Kill {
            host,
            signal: Signal::Term,
            require_success: false,
        }
    }

    /// `pkill` the host's daemon and require that a process was signalled.
    pub fn kill_checked(host: SaltHost) -> Self {
        Step::Kill {
            host,
            signal: Signal::Term,
            require_success: true,
        }
    }

    /// Start the host's daemon.
    pub fn start(host: SaltHost) -> Self {
        Step::Start { host }
    }

    /// Hold for a while.
    pub fn hold(duration: Duration) -> Self {
        Step::Hold(duration)
    }

    /// Probe once.
    pub fn probe(host: SaltHost, command: impl Into<String>, expect: Vec<Expectation>) -> Self {
        Step::Probe {
            host,
            command: command.into(),
            expect,
        }
    }

    /// Poll until ready.
    pub fn await_ready(host: SaltHost, command: impl Into<String>, expect: Vec<Expectation>) -> Self {
        Step::AwaitReady {
            host,
            command: command.into(),
            expect,
        }
    }

    /// `command` succeeds once on `host`.
    pub fn succeeds(host: SaltHost, command: SaltCommand) -> Self {
        Step::probe(host, command.as_str(), vec![Expectation::Success])
    }

    /// `command` eventually succeeds on `host`.
    pub fn eventually_succeeds(host: SaltHost, command: SaltCommand) -> Self {
        Step::await_ready(host, command.as_str(), vec![Expectation::Success])
    }

    /// The master on `host` no longer answers.
    pub fn master_down(host: SaltHost) -> Self {
        Step::probe(
            host,
            SaltCommand::TestPing.as_str(),
            vec![Expectation::contains(MASTER_NOT_RESPONDING)],
        )
    }

    /// The host's daemon process is alive.
    pub fn daemon_alive(host: SaltHost) -> Self {
        Step::probe(host, host.daemon().liveness_command(), vec![Expectation::Success])
    }

    /// Host the step acts on, if any.
    pub fn host(&self) -> Option<SaltHost> {
        match self {
            Step::Kill { host, .. }
            | Step::Start { host }
            | Step::Probe { host, .. }
            | Step::AwaitReady { host, .. } => Some(*host),
            Step::Hold(_) => None,
        }
    }

    /// Command line the step runs, if any.
    pub fn command(&self) -> Option<String> {
        match self {
            Step::Kill { host, signal, .. } => Some(host.daemon().stop_command(*signal)),
            Step::Start { host } => Some(host.daemon().start_command()),
            Step::Probe { command, .. } | Step::AwaitReady { command, .. } => Some(command.clone()),
            Step::Hold(_) => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Kill { host, signal, .. } => {
                write!(f, "kill {} on {} ({})", host.daemon(), host, signal)
            }
            Step::Start { host } => write!(f, "start {} on {}", host.daemon(), host),
            Step::Hold(duration) => write!(f, "hold for {}s", duration.as_secs()),
            Step::Probe { host, command, expect } => {
                write!(f, "probe `{}` on {} expecting {}", command, host, join(expect))
            }
            Step::AwaitReady { host, command, expect } => {
                write!(f, "await `{}` on {} until {}", command, host, join(expect))
            }
        }
    }
}

fn join(expect: &[Expectation]) -> String {
    if expect.is_empty() {
        return "anything".to_string();
    }
    expect
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" and ")
}

/// Durations a scenario is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioTimings {
    /// How long the minion is left alone with both masters down.
    pub minion_hold: Duration,
}

impl Default for ScenarioTimings {
    fn default() -> Self {
        Self {
            minion_hold: Duration::from_secs(300),
        }
    }
}

/// A named, ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name.
    pub name: String,

    /// One-line description.
    pub description: String,

    /// Steps, run in order.
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Creates an empty scenario.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Appends several steps.
    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the scenario has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_commands() {
        assert_eq!(
            Step::kill(SaltHost::Master1).command().as_deref(),
            Some("pkill salt-master")
        );
        assert_eq!(
            Step::start(SaltHost::Minion1).command().as_deref(),
            Some("salt-minion -d")
        );
        assert_eq!(Step::hold(Duration::from_secs(5)).command(), None);
        assert_eq!(Step::hold(Duration::from_secs(5)).host(), None);
    }

    #[test]
    fn test_step_display() {
        assert_eq!(
            Step::kill(SaltHost::Master2).to_string(),
            "kill salt-master on master2 (SIGTERM)"
        );
        assert_eq!(
            Step::succeeds(SaltHost::Master1, SaltCommand::TestPing).to_string(),
            "probe `salt * test.ping` on master1 expecting exit code 0"
        );
        assert_eq!(Step::hold(Duration::from_secs(300)).to_string(), "hold for 300s");
    }

    #[test]
    fn test_master_down_probe() {
        match Step::master_down(SaltHost::Master1) {
            Step::Probe { host, command, expect } => {
                assert_eq!(host, SaltHost::Master1);
                assert_eq!(command, "salt * test.ping");
                assert_eq!(expect, vec![Expectation::contains(MASTER_NOT_RESPONDING)]);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_scenario_builder() {
        let scenario = Scenario::new("demo", "demo scenario")
            .step(Step::kill(SaltHost::Master1))
            .steps([Step::start(SaltHost::Master1), Step::daemon_alive(SaltHost::Master1)]);
        assert_eq!(scenario.len(), 3);
        assert!(!scenario.is_empty());
    }
}
