//! The fixed set of hosts in a multi-master cluster.

use saltmm_orchestrator::HostName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScenarioError;
use crate::salt::SaltDaemon;

/// A host of the multi-master topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaltHost {
    /// First master.
    Master1,
    /// Second master.
    Master2,
    /// The only minion, configured with both masters.
    Minion1,
}

impl SaltHost {
    /// All hosts, in start order.
    pub const ALL: [SaltHost; 3] = [SaltHost::Master1, SaltHost::Master2, SaltHost::Minion1];

    /// Both masters.
    pub const MASTERS: [SaltHost; 2] = [SaltHost::Master1, SaltHost::Master2];

    /// Returns the logical host name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SaltHost::Master1 => "master1",
            SaltHost::Master2 => "master2",
            SaltHost::Minion1 => "minion1",
        }
    }

    /// Returns the host name used by the orchestrator.
    pub fn host_name(&self) -> HostName {
        HostName::new(self.as_str())
    }

    /// Returns the daemon this host runs.
    pub fn daemon(&self) -> SaltDaemon {
        match self {
            SaltHost::Master1 | SaltHost::Master2 => SaltDaemon::Master,
            SaltHost::Minion1 => SaltDaemon::Minion,
        }
    }

    /// Returns true for masters.
    pub fn is_master(&self) -> bool {
        self.daemon() == SaltDaemon::Master
    }
}

impl fmt::Display for SaltHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaltHost {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SaltHost::ALL
            .into_iter()
            .find(|host| host.as_str() == s)
            .ok_or_else(|| ScenarioError::invalid_configuration(format!("unknown host '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_daemons() {
        assert_eq!(SaltHost::Master2.daemon(), SaltDaemon::Master);
        assert_eq!(SaltHost::Minion1.daemon(), SaltDaemon::Minion);
        assert!(SaltHost::Master1.is_master());
        assert!(!SaltHost::Minion1.is_master());
    }

    #[test]
    fn test_host_names() {
        assert_eq!(SaltHost::Master1.host_name(), HostName::new("master1"));
        assert_eq!("minion1".parse::<SaltHost>().unwrap(), SaltHost::Minion1);
        assert!("minion2".parse::<SaltHost>().is_err());
    }
}
