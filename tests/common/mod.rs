//! Common test utilities for helmsman integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pollute
//! the user's data or config directories.

#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::Value;
use std::path::{Path, PathBuf};
pub use tempfile::TempDir;

/// A test environment with isolated data and config storage.
///
/// `hm()` sets `HM_DATA_DIR` and `HM_CONFIG_DIR` per invocation, making
/// tests parallel-safe.
pub struct TestEnv {
    pub repo_dir: TempDir,
    pub data_dir: TempDir,
    pub config_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            repo_dir: TempDir::new().unwrap(),
            data_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a new test environment and run `hm system init`.
    pub fn init() -> Self {
        let env = Self::new();
        env.hm().args(["system", "init"]).assert().success();
        env
    }

    /// Get a Command for the hm binary with isolated directories.
    pub fn hm(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_hm"));
        cmd.current_dir(self.repo_dir.path());
        cmd.env("HM_DATA_DIR", self.data_dir.path());
        cmd.env("HM_CONFIG_DIR", self.config_dir.path());
        cmd.env_remove("HM_REPO");
        cmd.env_remove("HM_LOG");
        cmd
    }

    pub fn repo_path(&self) -> &Path {
        self.repo_dir.path()
    }

    /// Run `hm` with `args`, assert success, and parse stdout as JSON.
    pub fn json(&self, args: &[&str]) -> Value {
        let output = self.hm().args(args).output().unwrap();
        assert!(
            output.status.success(),
            "hm {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
    }

    /// Run `hm` with `args`, expect exit `code`, and parse stderr as JSON.
    pub fn fails(&self, args: &[&str], code: i32) -> Value {
        let output = self.hm().args(args).output().unwrap();
        assert_eq!(
            output.status.code(),
            Some(code),
            "hm {:?}: stdout={} stderr={}",
            args,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stderr).expect("stderr is not JSON")
    }

    /// Create a directive and return its id.
    pub fn create(&self, title: &str, extra: &[&str]) -> String {
        let mut args = vec!["directive", "create", title];
        args.extend_from_slice(extra);
        self.json(&args)["id"].as_str().unwrap().to_string()
    }

    pub fn show(&self, id: &str) -> Value {
        self.json(&["directive", "show", id])
    }

    /// Write `content` into the repo dir and return its path.
    pub fn write_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.repo_dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// A packet file with all seven fields filled in.
    pub fn full_packet(&self) -> PathBuf {
        self.write_file("packet.json", &full_packet_json().to_string())
    }

    /// Record a passing activation.
    pub fn pass(&self, id: &str, phase: &str, specialist: &str) {
        self.json(&[
            "activation",
            "record",
            id,
            "--phase",
            phase,
            "--specialist",
            specialist,
            "--verdict",
            "pass",
        ]);
    }

    /// Request `from -> to` with a full packet; returns the process output.
    pub fn handoff(&self, id: &str, from: &str, to: &str) -> std::process::Output {
        let packet = self.full_packet();
        self.hm()
            .args(["handoff", "request", id, "--from", from, "--to", to, "--packet"])
            .arg(&packet)
            .output()
            .unwrap()
    }

    /// Satisfy the requirements of `from` for a directive without technical
    /// surface, then hand off to the next phase. Panics on rejection.
    pub fn advance(&self, id: &str, from: &str, to: &str) -> Value {
        match from {
            "PLAN" => self.pass(id, "PLAN", "DATABASE"),
            "EXEC" | "PLAN_VERIFY" => self.pass(id, from, "TESTING"),
            "LEAD_FINAL" => self.pass(id, "LEAD_FINAL", "DOCUMENTATION"),
            _ => {}
        }
        let output = self.handoff(id, from, to);
        assert!(
            output.status.success(),
            "handoff {} {} -> {} failed: {}",
            id,
            from,
            to,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    /// Walk a directive from `from` through COMPLETE.
    pub fn complete_from(&self, id: &str, from: &str) -> Value {
        const PHASES: [&str; 6] = ["LEAD", "PLAN", "EXEC", "PLAN_VERIFY", "LEAD_FINAL", "COMPLETE"];
        let start = PHASES.iter().position(|p| *p == from).unwrap();
        let mut last = Value::Null;
        for pair in PHASES[start..].windows(2) {
            last = self.advance(id, pair[0], pair[1]);
        }
        last
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

pub fn full_packet_json() -> Value {
    serde_json::json!({
        "executive_summary": "Phase work finished",
        "deliverables_manifest": "migrations/0042.sql",
        "completeness_report": "100%",
        "key_decisions": "Reuse existing tables",
        "known_issues": "None",
        "resource_utilization": "2 days",
        "action_items": "Review in next phase"
    })
}
