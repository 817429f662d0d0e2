//! Master/minion transport selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ScenarioError;

/// Wire protocol between the masters and the minion.
///
/// Fixed for the life of one deployed cluster; it only selects which compose
/// file the cluster is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Raw TCP transport.
    Tcp,
    /// ZeroMQ, the Salt default.
    Zeromq,
}

impl Transport {
    /// Every transport, in run order.
    pub const ALL: [Transport; 2] = [Transport::Tcp, Transport::Zeromq];

    /// Returns the name Salt uses for this transport.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Zeromq => "zeromq",
        }
    }

    /// Returns the compose file that builds a cluster for this transport.
    pub fn compose_file_name(&self) -> &'static str {
        match self {
            Transport::Tcp => "docker-compose-tcp.yml",
            Transport::Zeromq => "docker-compose.yml",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "zeromq" | "zmq" => Ok(Transport::Zeromq),
            other => Err(ScenarioError::invalid_configuration(format!(
                "unknown transport '{}' (expected tcp or zeromq)",
                other
            ))),
        }
    }
}
