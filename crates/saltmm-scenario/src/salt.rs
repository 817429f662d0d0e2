//! Salt command-line vocabulary.
//!
//! Everything the harness runs inside the containers is built here, so the
//! scenarios never spell out raw command strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Output of `salt` when the master it talks to is down.
pub const MASTER_NOT_RESPONDING: &str = "Salt request timed out. The master is not responding";

/// Output of `salt-call` when no master accepts the minion.
pub const NO_MASTER_REACHABLE: &str = "No master could be reached";

/// A Salt daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaltDaemon {
    /// `salt-master`.
    Master,
    /// `salt-minion`.
    Minion,
}

impl SaltDaemon {
    /// Returns the process name.
    pub fn process_name(&self) -> &'static str {
        match self {
            SaltDaemon::Master => "salt-master",
            SaltDaemon::Minion => "salt-minion",
        }
    }

    /// Command that starts the daemon in the background.
    pub fn start_command(&self) -> String {
        format!("{} -d", self.process_name())
    }

    /// Command that signals every process of the daemon.
    pub fn stop_command(&self, signal: Signal) -> String {
        match signal {
            Signal::Term => format!("pkill {}", self.process_name()),
            other => format!("pkill -{} {}", other.number(), self.process_name()),
        }
    }

    /// Command that exits 0 while the daemon is running.
    pub fn liveness_command(&self) -> String {
        format!("pgrep {}", self.process_name())
    }
}

impl fmt::Display for SaltDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.process_name())
    }
}

/// Signals used to stop daemons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    /// SIGTERM (15) - Graceful termination request.
    #[default]
    Term,
    /// SIGKILL (9) - Forceful termination.
    Kill,
}

impl Signal {
    /// Returns the signal number.
    pub fn number(&self) -> i32 {
        match self {
            Signal::Term => 15,
            Signal::Kill => 9,
        }
    }

    /// Returns the signal name (without SIG prefix).
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Term => "TERM",
            Signal::Kill => "KILL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIG{}", self.name())
    }
}

/// Salt client commands the scenarios probe with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaltCommand {
    /// `salt * test.ping` from a master.
    TestPing,
    /// `salt * config.get transport` from a master.
    ConfigGetTransport,
    /// `salt * saltutil.refresh_pillar` from a master.
    RefreshPillar,
    /// `salt-call test.ping` on the minion.
    CallTestPing,
}

impl SaltCommand {
    /// Returns the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            SaltCommand::TestPing => "salt * test.ping",
            SaltCommand::ConfigGetTransport => "salt * config.get transport",
            SaltCommand::RefreshPillar => "salt * saltutil.refresh_pillar",
            SaltCommand::CallTestPing => "salt-call test.ping",
        }
    }

    /// Returns the daemon whose host this command must run on.
    pub fn runs_on(&self) -> SaltDaemon {
        match self {
            SaltCommand::CallTestPing => SaltDaemon::Minion,
            _ => SaltDaemon::Master,
        }
    }
}

impl fmt::Display for SaltCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_commands() {
        assert_eq!(SaltDaemon::Master.start_command(), "salt-master -d");
        assert_eq!(SaltDaemon::Minion.stop_command(Signal::Term), "pkill salt-minion");
        assert_eq!(SaltDaemon::Master.stop_command(Signal::Kill), "pkill -9 salt-master");
        assert_eq!(SaltDaemon::Minion.liveness_command(), "pgrep salt-minion");
    }

    #[test]
    fn test_signal() {
        assert_eq!(Signal::default(), Signal::Term);
        assert_eq!(Signal::Kill.to_string(), "SIGKILL");
        assert_eq!(Signal::Kill.number(), 9);
    }

    #[test]
    fn test_command_hosts() {
        assert_eq!(SaltCommand::RefreshPillar.as_str(), "salt * saltutil.refresh_pillar");
        assert_eq!(SaltCommand::CallTestPing.runs_on(), SaltDaemon::Minion);
        assert_eq!(SaltCommand::TestPing.runs_on(), SaltDaemon::Master);
    }
}
