//! Helmsman - governance core for phased directive workflows.
//!
//! This library provides the core functionality for the `hm` CLI tool:
//! the directive hierarchy, weighted progress rollup, specialist requirement
//! checks, the phase handoff state machine, inherited contracts, and
//! remediation spawning for compliance violations.

pub mod action_log;
pub mod cli;
pub mod commands;
pub mod config;
pub mod governance;
pub mod models;
pub mod storage;

/// Test utilities for isolated test environments.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::path::Path;
    use tempfile::TempDir;

    use crate::storage::Storage;

    /// Test environment with isolated storage using dependency injection.
    pub struct TestEnv {
        /// Simulated repository directory
        pub repo_dir: TempDir,
        /// Isolated data storage directory
        pub data_dir: TempDir,
    }

    impl TestEnv {
        pub fn new() -> Self {
            Self {
                repo_dir: TempDir::new().unwrap(),
                data_dir: TempDir::new().unwrap(),
            }
        }

        /// Get the path to the simulated repository.
        pub fn path(&self) -> &Path {
            self.repo_dir.path()
        }

        /// Get the path to the isolated data directory.
        pub fn data_path(&self) -> &Path {
            self.data_dir.path()
        }

        /// Initialize storage for this test environment.
        pub fn init_storage(&self) -> Storage {
            Storage::init_with_data_dir(self.path(), self.data_path()).unwrap()
        }

        /// Open storage for this test environment.
        pub fn open_storage(&self) -> Storage {
            Storage::open_with_data_dir(self.path(), self.data_path()).unwrap()
        }
    }

    impl Default for TestEnv {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// Library-level error type for Helmsman operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not initialized: run `hm system init` first")]
    NotInitialized,

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // === Structural ===
    #[error("Cycle detected: {0}")]
    CycleDetected(String),

    #[error("{child} already belongs to {existing}; detach it first")]
    MultipleParents { child: String, existing: String },

    #[error("Invalid dependency chain: {0}")]
    InvalidChain(String),

    #[error("Incomplete decomposition: parent {0} has no children")]
    IncompleteDecomposition(String),

    // === Gating ===
    #[error("Out of order transition {from} -> {to}: {detail}")]
    OutOfOrder {
        from: String,
        to: String,
        detail: String,
    },

    #[error("Incomplete handoff packet, empty fields: {}", .missing.join(", "))]
    IncompletePacket { missing: Vec<String> },

    #[error("Unmet specialist requirements for {phase}: {}", .missing.join(", "))]
    UnmetRequirements { phase: String, missing: Vec<String> },

    #[error("Dependency not cleared for {directive}: waiting on {}", .blocking.join(", "))]
    DependencyNotCleared {
        directive: String,
        blocking: Vec<String>,
    },

    #[error("A {kind} contract already exists on {directive} ({existing})")]
    ContractAlreadyExists {
        directive: String,
        kind: String,
        existing: String,
    },
}

impl Error {
    /// Stable error-kind name, e.g. `"OutOfOrder"`.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "Io",
            Error::Json(_) => "Json",
            Error::Database(_) => "Database",
            Error::NotInitialized => "NotInitialized",
            Error::NotFound(_) => "NotFound",
            Error::InvalidId(_) => "InvalidId",
            Error::InvalidInput(_) => "InvalidInput",
            Error::Config(_) => "Config",
            Error::CycleDetected(_) => "CycleDetected",
            Error::MultipleParents { .. } => "MultipleParents",
            Error::InvalidChain(_) => "InvalidChain",
            Error::IncompleteDecomposition(_) => "IncompleteDecomposition",
            Error::OutOfOrder { .. } => "OutOfOrder",
            Error::IncompletePacket { .. } => "IncompletePacket",
            Error::UnmetRequirements { .. } => "UnmetRequirements",
            Error::DependencyNotCleared { .. } => "DependencyNotCleared",
            Error::ContractAlreadyExists { .. } => "ContractAlreadyExists",
        }
    }

    /// Error category: `structural`, `gating`, `store` or `input`.
    pub fn category(&self) -> &'static str {
        match self {
            Error::CycleDetected(_)
            | Error::MultipleParents { .. }
            | Error::InvalidChain(_)
            | Error::IncompleteDecomposition(_) => "structural",
            Error::OutOfOrder { .. }
            | Error::IncompletePacket { .. }
            | Error::UnmetRequirements { .. }
            | Error::DependencyNotCleared { .. } => "gating",
            Error::Io(_) | Error::Json(_) | Error::Database(_) | Error::NotInitialized => "store",
            _ => "input",
        }
    }

    /// Process exit code for the `hm` binary.
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            "structural" => 2,
            "gating" => 3,
            _ => 1,
        }
    }
}

/// Result type alias for Helmsman operations.
pub type Result<T> = std::result::Result<T, Error>;
