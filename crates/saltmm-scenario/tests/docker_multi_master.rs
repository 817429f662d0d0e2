//! Scenario catalog against real containers.
//!
//! Needs a running Docker daemon and the `saltstack/salt:3006` image. Run with
//! `cargo test -p saltmm-scenario --test docker_multi_master -- --ignored`.
//! `SALTMM_MINION_HOLD_SECS` shortens the both-masters-down hold.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use saltmm_orchestrator::{DockerComposeBackend, DockerComposeConfig, OrchestrationBackend};
use saltmm_scenario::{catalog, fixture, run_scenario, ReadinessPolicy, ScenarioTimings, Transport};

fn compose_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../multi_master")
}

fn timings() -> ScenarioTimings {
    let hold = std::env::var("SALTMM_MINION_HOLD_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(300);
    ScenarioTimings {
        minion_hold: Duration::from_secs(hold),
    }
}

async fn backend() -> Arc<dyn OrchestrationBackend> {
    let work_dir = std::env::temp_dir().join("saltmm-it");
    let config = DockerComposeConfig::builder()
        .project_name("saltmm-it")
        .work_dir(work_dir)
        .timeout_secs(180)
        .build();
    Arc::new(DockerComposeBackend::with_config(config).await.unwrap())
}

async fn run_all(transport: Transport) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,saltmm_scenario=debug")
        .with_test_writer()
        .try_init();

    let backend = backend().await;
    let policy = ReadinessPolicy::default();
    let mut failures = Vec::new();

    for scenario in catalog::all(transport, &timings()) {
        let topology = fixture::load_topology(&compose_dir(), transport, &scenario.name).unwrap();
        let report = run_scenario(Arc::clone(&backend), &topology, transport, &policy, &scenario)
            .await
            .unwrap();
        if !report.passed() {
            failures.push(format!("{}: {:?}", scenario.name, report.error));
        }
    }

    assert!(failures.is_empty(), "failed on {}: {:#?}", transport, failures);
}

#[tokio::test]
#[ignore = "needs a Docker daemon and the saltstack/salt image"]
async fn test_multi_master_tcp() {
    run_all(Transport::Tcp).await;
}

#[tokio::test]
#[ignore = "needs a Docker daemon and the saltstack/salt image"]
async fn test_multi_master_zeromq() {
    run_all(Transport::Zeromq).await;
}
