//! The multi-master failover scenarios.
//!
//! Each scenario starts from a healthy cluster: both masters up, the minion
//! connected to both. Kills are always followed by a probe that checks the
//! daemon is really gone before the scenario relies on it.

use crate::error::{Result, ScenarioError};
use crate::expect::Expectation;
use crate::host::SaltHost::{self, Master1, Master2, Minion1};
use crate::salt::{SaltCommand, NO_MASTER_REACHABLE};
use crate::scenario::{Scenario, ScenarioTimings, Step};
use crate::transport::Transport;

/// Scenario names, in run order.
pub const NAMES: [&str; 8] = [
    "multi_master",
    "first_master_stopped",
    "second_master_stopped",
    "first_master_down_on_minion_startup",
    "both_masters_stopped",
    "one_master_up_on_startup",
    "refresh_pillar",
    "masters_down_minion_cmd",
];

/// Builds the scenario registered under `name`.
pub fn build(name: &str, transport: Transport, timings: &ScenarioTimings) -> Result<Scenario> {
    let scenario = match name {
        "multi_master" => multi_master(transport),
        "first_master_stopped" => master_stopped(Master1, Master2, "first_master_stopped"),
        "second_master_stopped" => master_stopped(Master2, Master1, "second_master_stopped"),
        "first_master_down_on_minion_startup" => first_master_down_on_minion_startup(),
        "both_masters_stopped" => both_masters_stopped(timings),
        "one_master_up_on_startup" => one_master_up_on_startup(),
        "refresh_pillar" => refresh_pillar(),
        "masters_down_minion_cmd" => masters_down_minion_cmd(),
        other => return Err(ScenarioError::UnknownScenario(other.to_string())),
    };
    Ok(scenario)
}

/// Builds every scenario, in run order.
pub fn all(transport: Transport, timings: &ScenarioTimings) -> Vec<Scenario> {
    NAMES
        .iter()
        .filter_map(|name| build(name, transport, timings).ok())
        .collect()
}

/// Checks that every name is registered.
pub fn validate_names<S: AsRef<str>>(names: &[S]) -> Result<()> {
    for name in names {
        if !NAMES.contains(&name.as_ref()) {
            return Err(ScenarioError::UnknownScenario(name.as_ref().to_string()));
        }
    }
    Ok(())
}

fn both_masters_ping() -> impl Iterator<Item = Step> {
    SaltHost::MASTERS
        .into_iter()
        .map(|master| Step::succeeds(master, SaltCommand::TestPing))
}

fn kill_master(master: SaltHost) -> [Step; 2] {
    [Step::kill(master), Step::master_down(master)]
}

fn multi_master(transport: Transport) -> Scenario {
    let mut scenario = Scenario::new(
        "multi_master",
        "both masters answer and the cluster uses the configured transport",
    );
    for master in SaltHost::MASTERS {
        scenario = scenario.steps([
            Step::succeeds(master, SaltCommand::TestPing),
            Step::probe(
                master,
                SaltCommand::ConfigGetTransport.as_str(),
                vec![Expectation::contains(transport.as_str())],
            ),
        ]);
    }
    scenario
}

fn master_stopped(stopped: SaltHost, survivor: SaltHost, name: &str) -> Scenario {
    Scenario::new(
        name,
        format!("{} stops and {} keeps answering", stopped, survivor),
    )
    .steps(both_masters_ping())
    .steps(kill_master(stopped))
    .step(Step::succeeds(survivor, SaltCommand::TestPing))
}

fn first_master_down_on_minion_startup() -> Scenario {
    Scenario::new(
        "first_master_down_on_minion_startup",
        "the minion starts while master1 is down and connects to master2",
    )
    .steps(kill_master(Master1))
    .steps([
        Step::kill(Minion1),
        Step::start(Minion1),
        Step::eventually_succeeds(Master2, SaltCommand::TestPing),
    ])
}

fn both_masters_stopped(timings: &ScenarioTimings) -> Scenario {
    Scenario::new(
        "both_masters_stopped",
        "the minion starts with both masters down, stays alive, and reconnects once they return",
    )
    .steps(kill_master(Master1))
    .steps(kill_master(Master2))
    .steps([
        Step::kill(Minion1),
        Step::start(Minion1),
        Step::hold(timings.minion_hold),
        Step::daemon_alive(Minion1),
        Step::start(Master1),
        Step::start(Master2),
        Step::eventually_succeeds(Master1, SaltCommand::TestPing),
        Step::eventually_succeeds(Master2, SaltCommand::TestPing),
    ])
}

fn one_master_up_on_startup() -> Scenario {
    Scenario::new(
        "one_master_up_on_startup",
        "the minion starts with only master1 up and picks up master2 when it returns",
    )
    .steps(kill_master(Master2))
    .steps([
        Step::kill(Minion1),
        Step::start(Minion1),
        Step::eventually_succeeds(Master1, SaltCommand::TestPing),
        Step::start(Master2),
        Step::eventually_succeeds(Master2, SaltCommand::TestPing),
    ])
}

fn refresh_pillar() -> Scenario {
    Scenario::new(
        "refresh_pillar",
        "pillar refresh works from whichever master is up",
    )
    .steps(
        SaltHost::MASTERS
            .into_iter()
            .map(|master| Step::succeeds(master, SaltCommand::RefreshPillar)),
    )
    .steps(kill_master(Master1))
    .step(Step::succeeds(Master2, SaltCommand::RefreshPillar))
    .steps(kill_master(Master2))
    .steps([
        Step::start(Master1),
        Step::eventually_succeeds(Master1, SaltCommand::RefreshPillar),
    ])
}

fn masters_down_minion_cmd() -> Scenario {
    Scenario::new(
        "masters_down_minion_cmd",
        "salt-call on the minion reports that no master is reachable",
    )
    .steps(SaltHost::MASTERS.into_iter().map(Step::kill_checked))
    .step(Step::probe(
        Minion1,
        SaltCommand::CallTestPing.as_str(),
        vec![Expectation::contains(NO_MASTER_REACHABLE)],
    ))
}
