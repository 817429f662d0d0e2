//! Failover scenarios for Salt multi-master clusters.
//!
//! A scenario is a fixed list of steps run against a cluster of two masters
//! and one minion: kill a daemon, start it again, wait, and probe with Salt
//! commands whose exit codes and output are checked.
//!
//! # Architecture
//!
//! - [`executor`]: runs command lines on a [`SaltHost`] through any
//!   [`OrchestrationBackend`](saltmm_orchestrator::OrchestrationBackend)
//! - [`salt`]: daemons, signals, client commands, and the failure texts
//! - [`expect`] and [`wait`]: assertions and readiness polling
//! - [`scenario`], [`catalog`], [`driver`]: scenario definitions and execution
//! - [`fixture`]: per-scenario cluster setup and teardown
//! - [`sim`]: an in-memory cluster for dry runs and tests
//! - [`report`]: JSON-serializable results
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use saltmm_scenario::{catalog, fixture, ReadinessPolicy, ScenarioTimings, SimulatedCluster, Transport};
//!
//! let backend = Arc::new(SimulatedCluster::new(Transport::Tcp));
//! let topology = fixture::load_topology("multi_master".as_ref(), Transport::Tcp, "multi_master")?;
//! let scenario = catalog::build("multi_master", Transport::Tcp, &ScenarioTimings::default())?;
//! let report = fixture::run_scenario(backend, &topology, Transport::Tcp, &ReadinessPolicy::default(), &scenario).await?;
//! assert!(report.passed());
//! ```

#![warn(missing_docs)]

pub mod catalog;
pub mod driver;
pub mod error;
pub mod executor;
pub mod expect;
pub mod fixture;
pub mod host;
pub mod report;
pub mod salt;
pub mod scenario;
pub mod sim;
pub mod transport;
pub mod wait;

pub use driver::ScenarioDriver;
pub use error::{Result, ScenarioError};
pub use executor::{HostExecutor, ProbeResult};
pub use expect::Expectation;
pub use fixture::{run_scenario, MultiMasterFixture};
pub use host::SaltHost;
pub use report::{RunReport, ScenarioReport, StepReport};
pub use salt::{SaltCommand, SaltDaemon, Signal};
pub use scenario::{Scenario, ScenarioTimings, Step};
pub use sim::{SimFault, SimulatedCluster};
pub use transport::Transport;
pub use wait::ReadinessPolicy;
