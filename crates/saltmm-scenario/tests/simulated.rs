//! Scenario catalog against the simulated cluster.
//!
//! Time is paused, so holds and readiness waits finish instantly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use saltmm_orchestrator::{ClusterTopology, HostName, NodeRole, NodeSpec};
use saltmm_scenario::{
    catalog, fixture, run_scenario, ReadinessPolicy, ScenarioError, ScenarioReport,
    ScenarioTimings, SimFault, SimulatedCluster, Transport,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("saltmm_scenario=debug")
        .with_test_writer()
        .try_init();
}

fn compose_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../multi_master")
}

async fn run(sim: Arc<SimulatedCluster>, name: &str) -> ScenarioReport {
    let transport = sim.transport();
    let topology = fixture::load_topology(&compose_dir(), transport, name).unwrap();
    let scenario = catalog::build(name, transport, &ScenarioTimings::default()).unwrap();
    run_scenario(sim, &topology, transport, &ReadinessPolicy::default(), &scenario)
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_every_scenario_passes_on_both_transports() {
    init_tracing();

    for transport in Transport::ALL {
        for name in catalog::NAMES {
            let sim = Arc::new(SimulatedCluster::new(transport));
            let report = run(Arc::clone(&sim), name).await;

            assert!(
                report.passed(),
                "{} on {} failed: {:?}",
                name,
                transport,
                report.error
            );
            assert_eq!(report.transport, Some(transport));
            assert_eq!(sim.teardowns().await, 1, "{} was not torn down", name);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_zombie_master_fails_first_master_stopped() {
    let sim = Arc::new(SimulatedCluster::new(Transport::Tcp).with_fault(SimFault::ZombieMaster));
    let report = run(Arc::clone(&sim), "first_master_stopped").await;

    assert!(!report.passed());
    let failed = report.failed_step().unwrap();
    assert_eq!(failed.index, 4);
    assert_eq!(failed.host.as_deref(), Some("master1"));
    assert!(failed
        .error
        .as_deref()
        .unwrap()
        .contains("The master is not responding"));
    assert_eq!(report.steps.len(), 4, "steps after the failure must not run");
    assert_eq!(sim.teardowns().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_wrong_transport_fails_multi_master() {
    let sim = Arc::new(
        SimulatedCluster::new(Transport::Tcp).with_fault(SimFault::ReportsTransport(Transport::Zeromq)),
    );
    let report = run(sim, "multi_master").await;

    let failed = report.failed_step().unwrap();
    assert_eq!(failed.index, 2);
    assert_eq!(failed.command.as_deref(), Some("salt * config.get transport"));
    assert!(failed.output.as_deref().unwrap().contains("zeromq"));
}

#[tokio::test(start_paused = true)]
async fn test_minion_that_gives_up_fails_both_masters_stopped() {
    let sim = Arc::new(
        SimulatedCluster::new(Transport::Zeromq).with_fault(SimFault::MinionExitsWithoutMaster),
    );
    let report = run(Arc::clone(&sim), "both_masters_stopped").await;

    let failed = report.failed_step().unwrap();
    assert_eq!(failed.command.as_deref(), Some("pgrep salt-minion"));
    assert_eq!(failed.exit_code, Some(1));
    assert_eq!(sim.teardowns().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_reconnect_times_out_one_master_up() {
    let sim = Arc::new(SimulatedCluster::new(Transport::Tcp).with_fault(SimFault::NoReconnect));
    let report = run(sim, "one_master_up_on_startup").await;

    let failed = report.failed_step().unwrap();
    assert_eq!(failed.index, 7);
    assert_eq!(failed.host.as_deref(), Some("master2"));
    assert!(failed.error.as_deref().unwrap().starts_with("Timed out"));
}

#[tokio::test(start_paused = true)]
async fn test_failed_master_start_fails_refresh_pillar() {
    let sim = Arc::new(SimulatedCluster::new(Transport::Zeromq).with_fault(SimFault::MasterStartFails));
    let report = run(sim, "refresh_pillar").await;

    let failed = report.failed_step().unwrap();
    assert_eq!(failed.command.as_deref(), Some("salt-master -d"));
    assert!(failed.error.as_deref().unwrap().contains("daemon failed to start"));
}

#[tokio::test(start_paused = true)]
async fn test_hold_keeps_minion_alone_before_masters_return() {
    let sim = Arc::new(SimulatedCluster::new(Transport::Tcp));
    let started = tokio::time::Instant::now();
    let report = run(Arc::clone(&sim), "both_masters_stopped").await;
    assert!(report.passed());
    assert!(started.elapsed() >= Duration::from_secs(300));

    let history = sim.history().await;
    let minion = HostName::new("minion1");
    let start_minion = history
        .iter()
        .position(|r| r.host == minion && r.command == "salt-minion -d")
        .unwrap();
    let alive_check = history
        .iter()
        .rposition(|r| r.host == minion && r.command == "pgrep salt-minion")
        .unwrap();
    let first_master_start = history
        .iter()
        .position(|r| r.command == "salt-master -d")
        .unwrap();
    assert!(start_minion < alive_check);
    assert!(alive_check < first_master_start);
}

#[tokio::test(start_paused = true)]
async fn test_setup_failure_is_an_error() {
    let sim = Arc::new(SimulatedCluster::new(Transport::Tcp));
    let topology = ClusterTopology::builder("masters-only")
        .node(NodeSpec::builder("master1", "salt").role(NodeRole::Master).build())
        .build();
    let scenario = catalog::build("multi_master", Transport::Tcp, &ScenarioTimings::default()).unwrap();

    let err = run_scenario(sim, &topology, Transport::Tcp, &ReadinessPolicy::default(), &scenario)
        .await
        .unwrap_err();
    assert!(matches!(err, ScenarioError::Orchestrator(_)));
}

#[tokio::test(start_paused = true)]
async fn test_masters_down_minion_cmd_reports_no_master() {
    let sim = Arc::new(SimulatedCluster::new(Transport::Zeromq));
    let report = run(Arc::clone(&sim), "masters_down_minion_cmd").await;

    assert!(report.passed());
    let last = report.steps.last().unwrap();
    assert_eq!(last.command.as_deref(), Some("salt-call test.ping"));
    assert_ne!(last.exit_code, Some(0));
    assert!(last.output.as_deref().unwrap().contains("No master could be reached"));
}

#[tokio::test(start_paused = true)]
async fn test_salt_call_that_never_returns_fails_masters_down_minion_cmd() {
    let sim = Arc::new(SimulatedCluster::new(Transport::Tcp).with_fault(SimFault::CallRetriesForever));
    let started = tokio::time::Instant::now();
    let report = run(Arc::clone(&sim), "masters_down_minion_cmd").await;
    assert!(started.elapsed() >= ReadinessPolicy::default().exec_timeout);

    let failed = report.failed_step().unwrap();
    assert_eq!(failed.index, 3);
    assert_eq!(failed.command.as_deref(), Some("salt-call test.ping"));
    assert!(failed.error.as_deref().unwrap().contains("to finish within"));
    assert_eq!(sim.teardowns().await, 1);

    assert_eq!(report.logs.len(), 3);
    assert!(report.logs["minion1"].ends_with("$ salt-call test.ping -> -1"));
}

#[tokio::test(start_paused = true)]
async fn test_passing_scenario_carries_no_logs() {
    let sim = Arc::new(SimulatedCluster::new(Transport::Tcp));
    let report = run(sim, "masters_down_minion_cmd").await;
    assert!(report.passed());
    assert!(report.logs.is_empty());
}
