//! Harness configuration.
//!
//! Loaded from a TOML file, then overridden by CLI arguments. Every section
//! has defaults, so an empty file is a valid configuration.

use anyhow::Context;
use saltmm_orchestrator::DockerComposeConfig;
use saltmm_scenario::{catalog, ReadinessPolicy, ScenarioTimings, Transport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Harness configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Container runtime settings.
    pub docker: DockerConfig,

    /// Readiness polling.
    pub readiness: ReadinessConfig,

    /// Scenario durations.
    pub timings: TimingsConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// What to run.
    pub run: RunConfig,
}

/// Container runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Prefix for containers, networks, and volumes.
    pub project_name: String,

    /// Directory for generated compose files.
    pub work_dir: PathBuf,

    /// Directory holding `docker-compose.yml` and `docker-compose-tcp.yml`.
    pub compose_dir: PathBuf,

    /// Image replacing the one in the compose files.
    pub image_override: Option<String>,

    /// Pull images missing locally before deploying.
    pub pull_images: bool,

    /// Seconds a container may take to become healthy.
    pub timeout_secs: u64,

    /// Remove named volumes on teardown.
    pub remove_volumes: bool,

    /// Write the effective compose file for each deployment.
    pub generate_compose_file: bool,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            project_name: "saltmm".to_string(),
            work_dir: std::env::temp_dir().join("saltmm"),
            compose_dir: PathBuf::from("multi_master"),
            image_override: None,
            pull_images: false,
            timeout_secs: 180,
            remove_volumes: true,
            generate_compose_file: true,
        }
    }
}

impl DockerConfig {
    /// Returns the backend configuration.
    pub fn backend_config(&self) -> DockerComposeConfig {
        DockerComposeConfig::builder()
            .project_name(&self.project_name)
            .work_dir(&self.work_dir)
            .pull_images(self.pull_images)
            .timeout_secs(self.timeout_secs)
            .remove_volumes(self.remove_volumes)
            .generate_compose_file(self.generate_compose_file)
            .label("saltmm.version", env!("CARGO_PKG_VERSION"))
            .build()
    }
}

/// Readiness polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Give up waiting after this many seconds.
    pub timeout_secs: u64,

    /// Milliseconds between attempts.
    pub interval_ms: u64,

    /// Abandon a single command after this many seconds.
    pub exec_timeout_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 300,
            interval_ms: 2000,
            exec_timeout_secs: 120,
        }
    }
}

impl ReadinessConfig {
    /// Returns the readiness policy.
    pub fn policy(&self) -> ReadinessPolicy {
        ReadinessPolicy::new(
            Duration::from_secs(self.timeout_secs),
            Duration::from_millis(self.interval_ms),
        )
        .with_exec_timeout(Duration::from_secs(self.exec_timeout_secs))
    }
}

/// Scenario durations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingsConfig {
    /// Seconds the minion is left running with both masters down.
    pub minion_hold_secs: u64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            minion_hold_secs: 300,
        }
    }
}

impl TimingsConfig {
    /// Returns the scenario timings.
    pub fn timings(&self) -> ScenarioTimings {
        ScenarioTimings {
            minion_hold: Duration::from_secs(self.minion_hold_secs),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (pretty, json, compact).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// What to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Transports, in run order.
    pub transports: Vec<String>,

    /// Scenarios to run; empty means all of them.
    pub scenarios: Vec<String>,

    /// Where to write the JSON report.
    pub report_path: Option<PathBuf>,

    /// Use the simulated cluster instead of Docker.
    pub simulate: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            transports: Transport::ALL.iter().map(|t| t.to_string()).collect(),
            scenarios: Vec::new(),
            report_path: None,
            simulate: false,
        }
    }
}

impl HarnessConfig {
    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merges CLI arguments into the configuration.
    pub fn merge_cli_args(&mut self, args: &super::CliArgs) {
        if let Some(ref transport) = args.transport {
            self.run.transports = if transport.eq_ignore_ascii_case("all") {
                Transport::ALL.iter().map(|t| t.to_string()).collect()
            } else {
                vec![transport.clone()]
            };
        }

        if !args.scenario.is_empty() {
            self.run.scenarios = args.scenario.clone();
        }

        if let Some(ref path) = args.report {
            self.run.report_path = Some(path.clone());
        }

        if args.simulate {
            self.run.simulate = true;
        }

        if let Some(ref dir) = args.compose_dir {
            self.docker.compose_dir = dir.clone();
        }

        if let Some(ref image) = args.image {
            self.docker.image_override = Some(image.clone());
        }

        if let Some(secs) = args.minion_hold_secs {
            self.timings.minion_hold_secs = secs;
        }

        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        if self.run.transports.is_empty() {
            anyhow::bail!("No transports selected");
        }
        self.transports()?;

        catalog::validate_names(&self.run.scenarios).context("Invalid scenario selection")?;

        if self.readiness.interval_ms == 0 {
            anyhow::bail!("readiness.interval_ms must be greater than zero");
        }
        if self.readiness.timeout_secs == 0 {
            anyhow::bail!("readiness.timeout_secs must be greater than zero");
        }
        if self.readiness.exec_timeout_secs == 0 {
            anyhow::bail!("readiness.exec_timeout_secs must be greater than zero");
        }

        if self.docker.project_name.is_empty()
            || !self
                .docker
                .project_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            anyhow::bail!("Invalid project name: {:?}", self.docker.project_name);
        }

        Ok(())
    }

    /// Parses the selected transports, dropping duplicates.
    pub fn transports(&self) -> anyhow::Result<Vec<Transport>> {
        let mut transports = Vec::new();
        for name in &self.run.transports {
            let transport: Transport = name
                .parse()
                .with_context(|| format!("Invalid transport: {}", name))?;
            if !transports.contains(&transport) {
                transports.push(transport);
            }
        }
        Ok(transports)
    }

    /// Returns the selected scenario names in catalog order.
    pub fn scenario_names(&self) -> Vec<&'static str> {
        catalog::NAMES
            .iter()
            .copied()
            .filter(|name| self.run.scenarios.is_empty() || self.run.scenarios.iter().any(|s| s == name))
            .collect()
    }
}
