//! Checks on the Salt configuration mounted into the cluster.

use std::path::PathBuf;

use serde_yaml::Value;

fn load(relative: &str) -> Value {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../multi_master/conf")
        .join(relative);
    let text = std::fs::read_to_string(&path).unwrap();
    serde_yaml::from_str(&text).unwrap()
}

#[test]
fn test_minion_lists_both_masters() {
    let minion = load("minion/multimaster.conf");
    let masters: Vec<&str> = minion["master"]
        .as_sequence()
        .unwrap()
        .iter()
        .map(|m| m.as_str().unwrap())
        .collect();
    assert_eq!(masters, vec!["master1", "master2"]);
    assert_eq!(minion["id"].as_str(), Some("minion1"));
}

#[test]
fn test_salt_call_gives_up_without_a_master() {
    // `salt-call` with no master up must exit and print "No master could be
    // reached"; a negative or missing `master_tries` makes it retry forever.
    let minion = load("minion/multimaster.conf");
    let tries = minion["master_tries"].as_i64().unwrap();
    assert!(tries > 0, "master_tries is {}", tries);
}

#[test]
fn test_minion_notices_dead_masters() {
    let minion = load("minion/multimaster.conf");
    let interval = minion["master_alive_interval"].as_i64().unwrap();
    assert!(interval > 0);
}
