//! Integration tests for `hm system`, `hm config` and `hm log`.

mod common;

use common::TestEnv;
use predicates::prelude::*;

#[test]
fn test_init_is_idempotent() {
    let env = TestEnv::new();
    let first = env.json(&["system", "init"]);
    assert_eq!(first["initialized"], true);
    let storage_path = first["storage_path"].as_str().unwrap().to_string();
    assert!(storage_path.starts_with(env.data_dir.path().to_str().unwrap()));

    let id = env.create("Survives re-init", &[]);
    let second = env.json(&["system", "init"]);
    assert_eq!(second["initialized"], false);
    assert_eq!(second["storage_path"], storage_path.as_str());
    env.show(&id);
}

#[test]
fn test_info_before_and_after_init() {
    let env = TestEnv::new();
    let info = env.json(&["system", "info"]);
    assert_eq!(info["initialized"], false);
    assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));

    env.json(&["system", "init"]);
    assert_eq!(env.json(&["system", "info"])["initialized"], true);
}

#[test]
fn test_rebuild_cache_keeps_state() {
    let env = TestEnv::init();
    let parent = env.create("Parent", &[]);
    let out = env.json(&["directive", "decompose", &parent, "One", "Two"]);
    let second = out["directives"][1]["id"].as_str().unwrap().to_string();
    env.json(&["violation", "add", "--check", "c", "--rule", "RLS-001", "--severity", "low", "--unit", "1"]);
    env.json(&["remediate", "run", "c"]);

    let rebuilt = env.json(&["system", "rebuild-cache"]);
    assert_eq!(rebuilt["rebuilt"], true);

    let children = env.json(&["directive", "children", &parent]);
    assert_eq!(children["count"], 2);
    assert_eq!(children["directives"][1]["id"], second.as_str());
    assert_eq!(env.json(&["violation", "list"])["violations"][0]["status"], "acknowledged");

    // Chain edges survive: the second child still waits on the first.
    env.pass(&second, "PLAN", "DATABASE");
    let output = env.handoff(&second, "PLAN", "EXEC");
    assert_eq!(output.status.code(), Some(3));

    // Claims survive: the same unit links to the existing remediation.
    env.json(&["violation", "add", "--check", "c", "--rule", "RLS-002", "--severity", "low", "--unit", "1"]);
    let rerun = env.json(&["remediate", "run", "c"]);
    assert_eq!(rerun["outcomes"][0]["skipped"], true);
}

#[test]
fn test_config_show_defaults() {
    let env = TestEnv::init();
    let config = env.json(&["config", "show"]);
    assert_eq!(config["output_format"]["value"], "json");
    assert_eq!(config["output_format"]["source"], "default");
    assert_eq!(config["default_priority"]["value"], "medium");
    assert_eq!(config["action_log"]["value"], true);
    assert_eq!(config["activation_cache_ttl"]["value"], 30);
}

#[test]
fn test_config_set_session_value() {
    let env = TestEnv::init();
    let set = env.json(&["config", "set", "default-priority", "high"]);
    assert_eq!(set["key"], "default-priority");

    let config = env.json(&["config", "show"]);
    assert_eq!(config["default_priority"]["value"], "high");
    assert_eq!(config["default_priority"]["source"], "session");

    let created = env.json(&["directive", "create", "Uses default"]);
    assert_eq!(created["priority"], "high");

    let err = env.fails(&["config", "set", "colour", "blue"], 1);
    assert_eq!(err["code"], "InvalidInput");
    let err = env.fails(&["config", "set", "activation-cache-ttl", "99999"], 1);
    assert_eq!(err["code"], "InvalidInput");
}

#[test]
fn test_config_set_requires_init() {
    let env = TestEnv::new();
    let err = env.fails(&["config", "set", "output-format", "human"], 1);
    assert_eq!(err["code"], "NotInitialized");
}

#[test]
fn test_system_config_and_precedence() {
    let env = TestEnv::init();
    std::fs::write(
        env.config_dir.path().join("config.kdl"),
        "default-priority \"low\"\nactivation-cache-ttl 5\n",
    )
    .unwrap();

    let config = env.json(&["config", "show"]);
    assert_eq!(config["default_priority"]["value"], "low");
    assert_eq!(config["default_priority"]["source"], "system");
    assert_eq!(config["activation_cache_ttl"]["value"], 5);

    env.json(&["config", "set", "default-priority", "critical"]);
    let config = env.json(&["config", "show"]);
    assert_eq!(config["default_priority"]["value"], "critical");
    assert_eq!(config["default_priority"]["source"], "session");
}

#[test]
fn test_broken_system_config_is_reported() {
    let env = TestEnv::init();
    std::fs::write(env.config_dir.path().join("config.kdl"), "output-format \"json").unwrap();
    let err = env.fails(&["config", "show"], 1);
    assert_eq!(err["code"], "Config");
}

#[test]
fn test_human_output_from_config() {
    let env = TestEnv::init();
    env.json(&["config", "set", "output-format", "human"]);
    env.hm()
        .args(["directive", "create", "Friendly"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[LEAD draft 0%] Friendly (medium)"));

    env.hm()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("output-format        = human (session)"));

    // Errors follow the same format.
    env.hm()
        .args(["directive", "show", "hm-zzzz"])
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("Error:"));
}

#[test]
fn test_action_log_records_commands() {
    let env = TestEnv::init();
    env.create("Logged", &[]);
    env.hm().args(["directive", "show", "nope"]).assert().code(1);

    let log = env.json(&["log", "-n", "10"]);
    let commands: Vec<&str> = log["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["command"].as_str().unwrap())
        .collect();
    assert_eq!(commands, vec!["system init", "directive create", "directive show"]);
    assert_eq!(log["entries"][1]["success"], true);
    assert_eq!(log["entries"][2]["success"], false);
    assert_eq!(log["entries"][1]["args"]["title"], "Logged");

    let last = env.json(&["log", "-n", "1"]);
    assert_eq!(last["count"], 1);
    assert_eq!(last["entries"][0]["command"], "log");
}

#[test]
fn test_action_log_can_be_disabled() {
    let env = TestEnv::init();
    env.json(&["config", "set", "action-log", "false"]);
    env.create("Quiet", &[]);
    let log = env.json(&["log"]);
    assert_eq!(log["count"], 0);
}

#[test]
fn test_repo_flag_and_env() {
    let env = TestEnv::init();
    let elsewhere = common::TempDir::new().unwrap();

    let id = env.create("Home repo", &[]);
    env.hm()
        .current_dir(elsewhere.path())
        .args(["-C"])
        .arg(env.repo_path())
        .args(["directive", "show", &id])
        .assert()
        .success();

    env.hm()
        .current_dir(elsewhere.path())
        .env("HM_REPO", env.repo_path())
        .args(["directive", "show", &id])
        .assert()
        .success();

    let err = env.fails(&["-C", "/definitely/not/a/repo", "system", "info"], 1);
    assert_eq!(err["code"], "InvalidInput");
}
