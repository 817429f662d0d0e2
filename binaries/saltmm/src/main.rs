//! saltmm - failover checks for Salt multi-master clusters.
//!
//! Deploys two masters and one minion per scenario, kills and restarts the
//! Salt daemons, and checks that the minion keeps answering through whichever
//! master is still up.
//!
//! # Usage
//!
//! ```bash
//! # Every scenario on both transports, against Docker
//! saltmm
//!
//! # One scenario on TCP, with a shorter hold
//! saltmm --transport tcp --scenario both_masters_stopped --minion-hold-secs 30
//!
//! # Dry run against the in-memory cluster
//! saltmm --simulate --report report.json
//! ```

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::HarnessConfig;
use saltmm_orchestrator::{ContainerImage, DockerComposeBackend, OrchestrationBackend};
use saltmm_scenario::{
    catalog, fixture, run_scenario, RunReport, ScenarioReport, ScenarioTimings, SimulatedCluster,
    Transport,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI arguments for saltmm.
#[derive(Parser, Debug)]
#[command(
    name = "saltmm",
    about = "Failover scenarios for Salt multi-master clusters",
    version,
    author
)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", env = "SALTMM_CONFIG")]
    config: Option<PathBuf>,

    /// Transport to test (tcp, zeromq, all).
    #[arg(short, long, value_name = "TRANSPORT")]
    transport: Option<String>,

    /// Scenario to run; repeat to run several.
    #[arg(short, long, value_name = "NAME")]
    scenario: Vec<String>,

    /// List the scenarios and exit.
    #[arg(long)]
    list: bool,

    /// Run against the in-memory cluster instead of Docker.
    #[arg(long)]
    simulate: bool,

    /// Write the JSON report to this file.
    #[arg(short, long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Directory holding the compose files.
    #[arg(long, value_name = "DIR")]
    compose_dir: Option<PathBuf>,

    /// Image to use for every node.
    #[arg(long, value_name = "IMAGE")]
    image: Option<String>,

    /// Seconds the minion is left alone with both masters down.
    #[arg(long, value_name = "SECS", env = "SALTMM_MINION_HOLD_SECS")]
    minion_hold_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Enable JSON log output.
    #[arg(long)]
    json_logs: bool,

    /// Print the default configuration and exit.
    #[arg(long)]
    print_config: bool,
}

/// Runs the selected scenarios and collects their reports.
struct Harness {
    config: HarnessConfig,
    timings: ScenarioTimings,
    stop: Arc<AtomicBool>,
}

impl Harness {
    fn new(config: HarnessConfig) -> Self {
        let timings = config.timings.timings();
        Self {
            config,
            timings,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn run(&self) -> Result<RunReport> {
        let transports = self.config.transports()?;
        let names = self.config.scenario_names();
        let policy = self.config.readiness.policy();

        let docker: Option<Arc<dyn OrchestrationBackend>> = if self.config.run.simulate {
            None
        } else {
            let backend = DockerComposeBackend::with_config(self.config.docker.backend_config())
                .await
                .context("Failed to connect to Docker")?;
            Some(Arc::new(backend))
        };

        let backend_name = docker.as_ref().map(|b| b.name()).unwrap_or("simulated");
        let mut run = RunReport::new(backend_name);

        info!(
            run_id = %run.run_id,
            backend = backend_name,
            transports = ?transports,
            scenarios = names.len(),
            "Starting run"
        );

        'outer: for transport in transports {
            for name in &names {
                if self.stop.load(Ordering::SeqCst) {
                    warn!("Stopping before {} on {}", name, transport);
                    break 'outer;
                }

                let backend = match docker {
                    Some(ref backend) => Arc::clone(backend),
                    None => Arc::new(SimulatedCluster::new(transport)) as Arc<dyn OrchestrationBackend>,
                };

                let report = self.run_one(backend, transport, name, &policy).await;
                run.push(report);
            }
        }

        run.finish();
        Ok(run)
    }

    async fn run_one(
        &self,
        backend: Arc<dyn OrchestrationBackend>,
        transport: Transport,
        name: &str,
        policy: &saltmm_scenario::ReadinessPolicy,
    ) -> ScenarioReport {
        let prepared = catalog::build(name, transport, &self.timings).and_then(|scenario| {
            let mut topology =
                fixture::load_topology(&self.config.docker.compose_dir, transport, name)?;
            if let Some(ref image) = self.config.docker.image_override {
                topology.override_image(&ContainerImage::new(image.as_str()));
            }
            Ok((scenario, topology))
        });

        let result = match prepared {
            Ok((scenario, topology)) => {
                run_scenario(backend, &topology, transport, policy, &scenario).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(report) => report,
            Err(e) => {
                error!(scenario = name, transport = %transport, error = %e, "Scenario could not run");
                ScenarioReport::setup_failed(name, transport, e)
            }
        }
    }
}

/// Initialize tracing/logging.
fn init_tracing(config: &config::LoggingConfig, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    let format = if json_logs || config.format == "json" {
        "json"
    } else {
        &config.format
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn list_scenarios(timings: &ScenarioTimings) -> Result<()> {
    for name in catalog::NAMES {
        let scenario = catalog::build(name, Transport::Tcp, timings)?;
        println!("{:<28} {}", scenario.name, scenario.description);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    if args.print_config {
        let config = HarnessConfig::default();
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut config = if let Some(ref config_path) = args.config {
        HarnessConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        HarnessConfig::default()
    };

    config.merge_cli_args(&args);

    if args.list {
        return list_scenarios(&config.timings.timings());
    }

    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging, args.json_logs)?;

    info!(version = env!("CARGO_PKG_VERSION"), "saltmm starting");

    let report_path = config.run.report_path.clone();
    let harness = Harness::new(config);

    // A running scenario always finishes and tears down; the signal only
    // prevents the next one from starting.
    let stop = Arc::clone(&harness.stop);
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received, finishing the current scenario");
        stop.store(true, Ordering::SeqCst);
    });

    let run = harness.run().await?;

    println!("{}", run.summary());

    if let Some(path) = report_path {
        run.write_to(&path)
            .with_context(|| format!("Failed to write report to {:?}", path))?;
        info!(path = %path.display(), "Report written");
    }

    if !run.passed() {
        anyhow::bail!(
            "{} of {} scenarios failed",
            run.failed_count(),
            run.scenarios.len()
        );
    }

    info!("saltmm finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args_parsing() {
        let args = CliArgs::parse_from(["saltmm"]);
        assert!(args.config.is_none());
        assert!(args.transport.is_none());
        assert!(args.scenario.is_empty());
        assert!(!args.simulate);
        assert!(!args.json_logs);
    }

    #[test]
    fn test_cli_args_with_options() {
        let args = CliArgs::parse_from([
            "saltmm",
            "-t",
            "zeromq",
            "-s",
            "multi_master",
            "-s",
            "refresh_pillar",
            "--image",
            "saltstack/salt:3007",
            "--log-level",
            "debug",
            "--json-logs",
        ]);

        assert_eq!(args.transport.as_deref(), Some("zeromq"));
        assert_eq!(args.scenario, vec!["multi_master", "refresh_pillar"]);
        assert_eq!(args.image.as_deref(), Some("saltstack/salt:3007"));
        assert_eq!(args.log_level, Some("debug".to_string()));
        assert!(args.json_logs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_run_passes() {
        let mut config = HarnessConfig::default();
        config.run.simulate = true;
        config.docker.compose_dir =
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../multi_master");
        config.run.scenarios = vec!["multi_master".to_string(), "both_masters_stopped".to_string()];

        let run = Harness::new(config).run().await.unwrap();
        assert_eq!(run.backend, "simulated");
        assert_eq!(run.scenarios.len(), 4);
        assert!(run.passed(), "{}", run.summary());
    }

    #[tokio::test]
    async fn test_missing_compose_dir_is_reported_per_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HarnessConfig::default();
        config.run.simulate = true;
        config.run.transports = vec!["tcp".to_string()];
        config.run.scenarios = vec!["multi_master".to_string()];
        config.docker.compose_dir = dir.path().to_path_buf();

        let run = Harness::new(config).run().await.unwrap();
        assert_eq!(run.scenarios.len(), 1);
        assert!(!run.passed());
        assert!(run.scenarios[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("setup failed"));
    }
}
