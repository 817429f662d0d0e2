//! Logical host names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical name of a host in a cluster, e.g. `master1`.
///
/// This is the name other containers resolve on the cluster network, not the
/// runtime container name (which carries a project prefix).
///
/// ```
/// use saltmm_orchestrator::HostName;
///
/// let host = HostName::new("master1");
/// assert_eq!(host.as_str(), "master1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostName(String);

impl HostName {
    /// Creates a host name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HostName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for HostName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for HostName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_name_display() {
        assert_eq!(HostName::from("minion1").to_string(), "minion1");
    }

    #[test]
    fn test_host_name_ordering() {
        let mut hosts = vec![
            HostName::from("minion1"),
            HostName::from("master2"),
            HostName::from("master1"),
        ];
        hosts.sort();
        assert_eq!(hosts[0].as_str(), "master1");
        assert_eq!(hosts[2].as_str(), "minion1");
    }
}
