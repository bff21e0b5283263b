//! Storage layer for Helmsman data.
//!
//! This module is the governance store: it persists directives, dependency
//! chain edges, handoff packets, contracts, violations and specialist
//! activations.
//!
//! ## Layout
//!
//! Data lives outside the repository at `<data dir>/helmsman/<repo-hash>/`:
//! - JSONL files for append-only data (`directives.jsonl`, `edges.jsonl`, ...);
//!   the latest line for a key wins
//! - SQLite for indexed queries and store-level uniqueness (`cache.db`)
//!
//! The cache carries the constraints concurrent callers rely on: one chain
//! successor and predecessor per directive, one contract of each kind per
//! directive, and one remediation claim per `(group_key, unit)`.

use crate::models::graph::DirectiveGraph;
use crate::models::{
    Contract, ContractKind, DependencyEdge, Directive, DirectiveStatus, HandoffPacket,
    HandoffStatus, Phase, SubAgentActivation, Violation, ViolationStatus,
};
use crate::{Error, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// ID prefix for directives.
pub const DIRECTIVE_PREFIX: &str = "hm";
/// ID prefix for contracts.
pub const CONTRACT_PREFIX: &str = "hmc";
/// ID prefix for handoff packets.
pub const HANDOFF_PREFIX: &str = "hmh";
/// ID prefix for violations.
pub const VIOLATION_PREFIX: &str = "hmv";
/// ID prefix for specialist activations.
pub const ACTIVATION_PREFIX: &str = "hma";

const JSONL_FILES: [&str; 6] = [
    Directive::FILE,
    DependencyEdge::FILE,
    HandoffPacket::FILE,
    Contract::FILE,
    Violation::FILE,
    SubAgentActivation::FILE,
];

/// A record persisted as one JSON line per version.
pub trait Record: Serialize + DeserializeOwned {
    /// JSONL file name under the store root.
    const FILE: &'static str;

    /// Key identifying successive versions of the same record.
    fn key(&self) -> String;
}

impl Record for Directive {
    const FILE: &'static str = "directives.jsonl";
    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for DependencyEdge {
    const FILE: &'static str = "edges.jsonl";
    fn key(&self) -> String {
        format!("{}->{}", self.before_id, self.after_id)
    }
}

impl Record for HandoffPacket {
    const FILE: &'static str = "handoffs.jsonl";
    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for Contract {
    const FILE: &'static str = "contracts.jsonl";
    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for Violation {
    const FILE: &'static str = "violations.jsonl";
    fn key(&self) -> String {
        self.id.clone()
    }
}

impl Record for SubAgentActivation {
    const FILE: &'static str = "activations.jsonl";
    fn key(&self) -> String {
        self.id.clone()
    }
}

/// Filters for [`Storage::list_directives`].
#[derive(Debug, Clone, Default)]
pub struct DirectiveFilter {
    pub status: Option<DirectiveStatus>,
    pub phase: Option<Phase>,
    pub parent_id: Option<String>,
}

/// Outcome of claiming a set of units for a remediation group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Every unit is now held by the requesting directive
    Claimed,
    /// At least one unit is held by another directive; nothing was claimed
    HeldBy(String),
}

/// Condition checked against the stored row by [`Storage::update_directive_if`].
#[derive(Debug, Clone, Copy)]
pub enum DirectiveGuard<'a> {
    /// The stored parent is unset or already this directive
    ParentFreeOr(&'a str),
    /// The stored phase is this one
    AtPhase(Phase),
}

/// Storage manager for a single repository.
pub struct Storage {
    /// Root directory for this repository's data
    pub root: PathBuf,
    /// SQLite connection for indexed queries
    conn: Connection,
}

impl Storage {
    /// Open existing storage for the given repository path.
    pub fn open(repo_path: &Path) -> Result<Self> {
        let root = get_storage_dir(repo_path)?;
        Self::open_at(root)
    }

    /// Initialize storage for a new repository.
    pub fn init(repo_path: &Path) -> Result<Self> {
        let root = get_storage_dir(repo_path)?;
        Self::init_at(root)
    }

    /// Check if storage exists for the given repository.
    pub fn exists(repo_path: &Path) -> Result<bool> {
        let root = get_storage_dir(repo_path)?;
        Ok(root.exists() && root.join("cache.db").exists())
    }

    /// Open storage under an explicit data directory.
    pub fn open_with_data_dir(repo_path: &Path, data_dir: &Path) -> Result<Self> {
        Self::open_at(storage_dir_in(repo_path, data_dir)?)
    }

    /// Initialize storage under an explicit data directory.
    pub fn init_with_data_dir(repo_path: &Path, data_dir: &Path) -> Result<Self> {
        Self::init_at(storage_dir_in(repo_path, data_dir)?)
    }

    fn open_at(root: PathBuf) -> Result<Self> {
        if !root.exists() {
            return Err(Error::NotInitialized);
        }

        let conn = Connection::open(root.join("cache.db"))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init_schema(&conn)?;

        Ok(Self { root, conn })
    }

    fn init_at(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;

        for file in JSONL_FILES {
            let path = root.join(file);
            if !path.exists() {
                File::create(&path)?;
            }
        }

        let conn = Connection::open(root.join("cache.db"))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::init_schema(&conn)?;

        tracing::debug!(root = %root.display(), "initialized store");
        Ok(Self { root, conn })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the per-repository session config file.
    pub fn session_config_path(&self) -> PathBuf {
        self.root.join("config.kdl")
    }

    /// Initialize the SQLite schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS directives (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                status TEXT NOT NULL,
                current_phase TEXT NOT NULL,
                priority TEXT NOT NULL,
                relationship_type TEXT NOT NULL,
                parent_id TEXT,
                progress INTEGER NOT NULL DEFAULT 0,
                group_key TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_directives_parent ON directives(parent_id);
            CREATE INDEX IF NOT EXISTS idx_directives_status ON directives(status);
            CREATE INDEX IF NOT EXISTS idx_directives_group ON directives(group_key);

            -- Sibling chains: one successor and one predecessor per directive
            CREATE TABLE IF NOT EXISTS dependency_edges (
                parent_id TEXT NOT NULL,
                before_id TEXT NOT NULL UNIQUE,
                after_id TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_edges_parent ON dependency_edges(parent_id);

            CREATE TABLE IF NOT EXISTS handoffs (
                id TEXT PRIMARY KEY,
                directive_id TEXT NOT NULL,
                from_phase TEXT NOT NULL,
                to_phase TEXT NOT NULL,
                status TEXT NOT NULL,
                system INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_handoffs_directive ON handoffs(directive_id);

            CREATE TABLE IF NOT EXISTS contracts (
                id TEXT PRIMARY KEY,
                directive_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (directive_id, kind)
            );

            CREATE TABLE IF NOT EXISTS violations (
                id TEXT PRIMARY KEY,
                check_id TEXT NOT NULL,
                rule_id TEXT NOT NULL,
                severity TEXT NOT NULL,
                affected_unit TEXT NOT NULL,
                status TEXT NOT NULL,
                remediation_directive_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_violations_check ON violations(check_id, status);
            CREATE INDEX IF NOT EXISTS idx_violations_remediation ON violations(remediation_directive_id);

            CREATE TABLE IF NOT EXISTS activations (
                id TEXT PRIMARY KEY,
                directive_id TEXT NOT NULL,
                phase TEXT NOT NULL,
                specialist TEXT NOT NULL,
                status TEXT NOT NULL,
                verdict TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_activations_lookup ON activations(directive_id, phase);

            -- One open remediation directive per (group, unit)
            CREATE TABLE IF NOT EXISTS remediation_claims (
                group_key TEXT NOT NULL,
                unit TEXT NOT NULL,
                directive_id TEXT NOT NULL,
                claimed_at TEXT NOT NULL,
                PRIMARY KEY (group_key, unit)
            );

            CREATE INDEX IF NOT EXISTS idx_claims_directive ON remediation_claims(directive_id);
            "#,
        )?;

        Ok(())
    }

    /// Rebuild the SQLite cache from JSONL files.
    ///
    /// Remediation claims are derived from the tags of non-terminal
    /// remediation directives.
    pub fn rebuild_cache(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            DELETE FROM directives;
            DELETE FROM dependency_edges;
            DELETE FROM handoffs;
            DELETE FROM contracts;
            DELETE FROM violations;
            DELETE FROM activations;
            DELETE FROM remediation_claims;
            "#,
        )?;

        let directives: Vec<Directive> = self.load_all()?;
        for directive in &directives {
            self.cache_directive(directive)?;
            if directive.status.is_terminal() {
                continue;
            }
            if let Some(tag) = directive.remediation() {
                for unit in &tag.affected_units {
                    self.conn.execute(
                        "INSERT OR IGNORE INTO remediation_claims (group_key, unit, directive_id, claimed_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![tag.group_key, unit, directive.id, directive.updated_at.to_rfc3339()],
                    )?;
                }
            }
        }
        for edge in self.load_all::<DependencyEdge>()? {
            self.conn.execute(
                "INSERT OR IGNORE INTO dependency_edges (parent_id, before_id, after_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![edge.parent_id, edge.before_id, edge.after_id, edge.created_at.to_rfc3339()],
            )?;
        }
        for packet in self.load_all::<HandoffPacket>()? {
            self.cache_handoff(&packet)?;
        }
        for contract in self.load_all::<Contract>()? {
            self.conn.execute(
                "INSERT OR IGNORE INTO contracts (id, directive_id, kind, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    contract.id,
                    contract.directive_id,
                    contract.kind().as_str(),
                    contract.created_at.to_rfc3339()
                ],
            )?;
        }
        for violation in self.load_all::<Violation>()? {
            self.cache_violation(&violation)?;
        }
        for activation in self.load_all::<SubAgentActivation>()? {
            self.cache_activation(&activation)?;
        }

        tracing::info!(directives = directives.len(), "rebuilt cache");
        Ok(())
    }

    // === JSONL primitives ===

    fn append<T: Record>(&self, record: &T) -> Result<()> {
        append_to(&self.root, record)
    }

    /// Latest version of every record, in order of first appearance.
    fn load_all<T: Record>(&self) -> Result<Vec<T>> {
        self.load_matching(|_| true)
    }

    fn load_matching<T: Record>(&self, mut keep: impl FnMut(&T) -> bool) -> Result<Vec<T>> {
        let path = self.root.join(T::FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&path)?);

        let mut records: Vec<T> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = match serde_json::from_str::<T>(&line) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(file = T::FILE, error = %e, "skipping malformed record");
                    continue;
                }
            };
            let key = record.key();
            match positions.get(&key) {
                Some(&pos) => records[pos] = record,
                None => {
                    positions.insert(key, records.len());
                    records.push(record);
                }
            }
        }
        records.retain(|r| keep(r));
        Ok(records)
    }

    fn load_one<T: Record>(&self, key: &str) -> Result<Option<T>> {
        Ok(self
            .load_matching::<T>(|r| r.key() == key)?
            .into_iter()
            .next())
    }

    /// Load the records for `keys`, preserving the order of `keys`.
    fn load_keys<T: Record>(&self, keys: &[String]) -> Result<Vec<T>> {
        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let mut by_key: HashMap<String, T> = self
            .load_matching::<T>(|r| wanted.contains(r.key().as_str()))?
            .into_iter()
            .map(|r| (r.key(), r))
            .collect();
        Ok(keys.iter().filter_map(|k| by_key.remove(k)).collect())
    }

    fn query_ids(&self, sql: &str, values: &[&dyn rusqlite::ToSql]) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map(values, |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Generate an id with `prefix` that is not yet used in this store.
    pub fn generate_unique_id(&self, prefix: &str, seed: &str) -> Result<String> {
        let table = match prefix {
            DIRECTIVE_PREFIX => "directives",
            CONTRACT_PREFIX => "contracts",
            HANDOFF_PREFIX => "handoffs",
            VIOLATION_PREFIX => "violations",
            ACTIVATION_PREFIX => "activations",
            other => return Err(Error::InvalidId(format!("Unknown id prefix: {}", other))),
        };
        let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?1", table);
        for attempt in 0..32u32 {
            let id = generate_id(prefix, &format!("{}:{}", seed, attempt));
            let taken: i64 = self.conn.query_row(&sql, [&id], |row| row.get(0))?;
            if taken == 0 {
                return Ok(id);
            }
        }
        Err(Error::InvalidInput(format!(
            "Could not allocate a free {} id",
            prefix
        )))
    }

    // === Directive Operations ===

    /// Create a new directive.
    pub fn create_directive(&mut self, directive: &Directive) -> Result<()> {
        self.append(directive)?;
        self.cache_directive(directive)?;
        Ok(())
    }

    /// Get a directive by ID.
    pub fn get_directive(&self, id: &str) -> Result<Directive> {
        self.load_one(id)?
            .ok_or_else(|| Error::NotFound(format!("Directive not found: {}", id)))
    }

    /// Update a directive.
    pub fn update_directive(&mut self, directive: &Directive) -> Result<()> {
        self.get_directive(&directive.id)?;
        self.append(directive)?;
        self.cache_directive(directive)?;
        Ok(())
    }

    /// Update a directive only if its stored row still satisfies `guard`.
    ///
    /// The check and the write happen in one IMMEDIATE transaction, so of two
    /// concurrent callers racing on the same guard at most one succeeds.
    /// Returns false, with nothing written, when the guard no longer holds.
    pub fn update_directive_if(&mut self, directive: &Directive, guard: DirectiveGuard<'_>) -> Result<bool> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !update_directive_row(&tx, directive, guard)? {
            return Ok(false);
        }
        append_to(&self.root, directive)?;
        tx.commit()?;
        Ok(true)
    }

    /// Accept `packet` and store `directive` at its new phase in one write.
    ///
    /// Returns false, with nothing written, if the directive is no longer at
    /// the packet's `from_phase`.
    pub fn commit_transition(&mut self, directive: &Directive, packet: &HandoffPacket) -> Result<bool> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !update_directive_row(&tx, directive, DirectiveGuard::AtPhase(packet.from_phase))? {
            return Ok(false);
        }
        write_handoff_row(&tx, packet)?;
        append_to(&self.root, packet)?;
        append_to(&self.root, directive)?;
        tx.commit()?;
        Ok(true)
    }

    /// List directives, optionally filtered.
    pub fn list_directives(&self, filter: &DirectiveFilter) -> Result<Vec<Directive>> {
        let mut sql = String::from("SELECT id FROM directives WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            params_vec.push(Box::new(status.as_str()));
        }
        if let Some(phase) = filter.phase {
            sql.push_str(" AND current_phase = ?");
            params_vec.push(Box::new(phase.as_str()));
        }
        if let Some(parent) = &filter.parent_id {
            sql.push_str(" AND parent_id = ?");
            params_vec.push(Box::new(parent.clone()));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let ids = self.query_ids(&sql, &params_refs)?;
        self.load_keys(&ids)
    }

    /// Direct children of `parent_id`, in creation order.
    pub fn get_children(&self, parent_id: &str) -> Result<Vec<Directive>> {
        self.list_directives(&DirectiveFilter {
            parent_id: Some(parent_id.to_string()),
            ..Default::default()
        })
    }

    /// Non-terminal directives tagged with remediation group `group_key`.
    pub fn find_open_remediations(&self, group_key: &str) -> Result<Vec<Directive>> {
        let ids = self.query_ids(
            "SELECT id FROM directives
             WHERE group_key = ?1 AND status NOT IN ('completed', 'cancelled')
             ORDER BY created_at ASC, id ASC",
            params![group_key],
        )?;
        self.load_keys(&ids)
    }

    /// Snapshot of the whole hierarchy and its chain edges.
    pub fn load_graph(&self) -> Result<DirectiveGraph> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, parent_id FROM directives ORDER BY created_at ASC, id ASC")?;
        let nodes = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stmt = self
            .conn
            .prepare("SELECT before_id, after_id FROM dependency_edges")?;
        let edges = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(DirectiveGraph::build(
            nodes.iter().map(|(id, parent)| (id.as_str(), parent.as_deref())),
            edges.iter().map(|(b, a)| (b.as_str(), a.as_str())),
        ))
    }

    fn cache_directive(&self, directive: &Directive) -> Result<()> {
        write_directive_row(&self.conn, directive)
    }

    // === Dependency Edge Operations ===

    /// Add a chain edge. The cache's uniqueness constraints reject a second
    /// successor or predecessor even under concurrent writers.
    pub fn add_edge(&mut self, edge: &DependencyEdge) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT INTO dependency_edges (parent_id, before_id, after_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                edge.parent_id,
                edge.before_id,
                edge.after_id,
                edge.created_at.to_rfc3339()
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                return Err(Error::InvalidChain(format!(
                    "{} -> {} conflicts with an existing chain edge",
                    edge.before_id, edge.after_id
                )));
            }
            Err(e) => return Err(e.into()),
        }
        append_to(&self.root, edge)?;
        tx.commit()?;
        Ok(())
    }

    /// Chain edges, optionally limited to one parent.
    pub fn list_edges(&self, parent_id: Option<&str>) -> Result<Vec<DependencyEdge>> {
        let edges = self.load_all::<DependencyEdge>()?;
        Ok(match parent_id {
            Some(parent) => edges.into_iter().filter(|e| e.parent_id == parent).collect(),
            None => edges,
        })
    }

    // === Handoff Operations ===

    /// Persist a new packet or a new version of an existing one.
    pub fn save_handoff(&mut self, packet: &HandoffPacket) -> Result<()> {
        self.append(packet)?;
        self.cache_handoff(packet)?;
        Ok(())
    }

    pub fn get_handoff(&self, id: &str) -> Result<HandoffPacket> {
        self.load_one(id)?
            .ok_or_else(|| Error::NotFound(format!("Handoff not found: {}", id)))
    }

    /// Handoff packets for a directive, oldest first.
    pub fn list_handoffs(&self, directive_id: &str) -> Result<Vec<HandoffPacket>> {
        let ids = self.query_ids(
            "SELECT id FROM handoffs WHERE directive_id = ?1 ORDER BY created_at ASC, id ASC",
            params![directive_id],
        )?;
        self.load_keys(&ids)
    }

    /// True if any packet for `directive_id` has been accepted.
    pub fn has_accepted_handoff(&self, directive_id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM handoffs WHERE directive_id = ?1 AND status = ?2",
            params![directive_id, HandoffStatus::Accepted.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn cache_handoff(&self, packet: &HandoffPacket) -> Result<()> {
        write_handoff_row(&self.conn, packet)
    }

    // === Contract Operations ===

    /// Attach a contract.
    ///
    /// Fails with [`Error::ContractAlreadyExists`] if the directive already
    /// holds a contract of the same kind; the existing one is never replaced.
    pub fn attach_contract(&mut self, contract: &Contract) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT INTO contracts (id, directive_id, kind, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                contract.id,
                contract.directive_id,
                contract.kind().as_str(),
                contract.created_at.to_rfc3339()
            ],
        );
        match inserted {
            Ok(_) => {}
            Err(e) if is_constraint_violation(&e) => {
                let existing: String = tx.query_row(
                    "SELECT id FROM contracts WHERE directive_id = ?1 AND kind = ?2",
                    params![contract.directive_id, contract.kind().as_str()],
                    |row| row.get(0),
                )?;
                return Err(Error::ContractAlreadyExists {
                    directive: contract.directive_id.clone(),
                    kind: contract.kind().to_string(),
                    existing,
                });
            }
            Err(e) => return Err(e.into()),
        }
        append_to(&self.root, contract)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_contract(&self, id: &str) -> Result<Contract> {
        self.load_one(id)?
            .ok_or_else(|| Error::NotFound(format!("Contract not found: {}", id)))
    }

    /// Contracts attached directly to a directive (data before ux).
    pub fn contracts_for(&self, directive_id: &str) -> Result<Vec<Contract>> {
        let ids = self.query_ids(
            "SELECT id FROM contracts WHERE directive_id = ?1 ORDER BY kind ASC",
            params![directive_id],
        )?;
        self.load_keys(&ids)
    }

    pub fn contract_for(&self, directive_id: &str, kind: ContractKind) -> Result<Option<Contract>> {
        let id: Option<String> = self
            .conn
            .query_row(
                "SELECT id FROM contracts WHERE directive_id = ?1 AND kind = ?2",
                params![directive_id, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => Ok(Some(self.get_contract(&id)?)),
            None => Ok(None),
        }
    }

    // === Violation Operations ===

    pub fn add_violation(&mut self, violation: &Violation) -> Result<()> {
        self.append(violation)?;
        self.cache_violation(violation)?;
        Ok(())
    }

    pub fn get_violation(&self, id: &str) -> Result<Violation> {
        self.load_one(id)?
            .ok_or_else(|| Error::NotFound(format!("Violation not found: {}", id)))
    }

    pub fn update_violation(&mut self, violation: &Violation) -> Result<()> {
        self.get_violation(&violation.id)?;
        self.append(violation)?;
        self.cache_violation(violation)?;
        Ok(())
    }

    /// List violations, optionally filtered by check run and status.
    pub fn list_violations(
        &self,
        check_id: Option<&str>,
        status: Option<ViolationStatus>,
    ) -> Result<Vec<Violation>> {
        let mut sql = String::from("SELECT id FROM violations WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(check) = check_id {
            sql.push_str(" AND check_id = ?");
            params_vec.push(Box::new(check.to_string()));
        }
        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            params_vec.push(Box::new(status.to_string()));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let ids = self.query_ids(&sql, &params_refs)?;
        self.load_keys(&ids)
    }

    /// Violations linked to a remediation directive.
    pub fn violations_for_directive(&self, directive_id: &str) -> Result<Vec<Violation>> {
        let ids = self.query_ids(
            "SELECT id FROM violations WHERE remediation_directive_id = ?1 ORDER BY created_at ASC, id ASC",
            params![directive_id],
        )?;
        self.load_keys(&ids)
    }

    fn cache_violation(&self, violation: &Violation) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO violations
             (id, check_id, rule_id, severity, affected_unit, status, remediation_directive_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                violation.id,
                violation.check_id,
                violation.rule_id,
                violation.severity.to_string(),
                violation.affected_unit,
                violation.status.to_string(),
                violation.remediation_directive_id,
                violation.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // === Activation Operations ===

    pub fn record_activation(&mut self, activation: &SubAgentActivation) -> Result<()> {
        self.append(activation)?;
        self.cache_activation(activation)?;
        Ok(())
    }

    /// Activations for a directive and phase, oldest first.
    pub fn list_activations(&self, directive_id: &str, phase: Phase) -> Result<Vec<SubAgentActivation>> {
        let ids = self.query_ids(
            "SELECT id FROM activations WHERE directive_id = ?1 AND phase = ?2
             ORDER BY recorded_at ASC, rowid ASC",
            params![directive_id, phase.as_str()],
        )?;
        self.load_keys(&ids)
    }

    fn cache_activation(&self, activation: &SubAgentActivation) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO activations
             (id, directive_id, phase, specialist, status, verdict, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                activation.id,
                activation.directive_id,
                activation.phase.as_str(),
                activation.specialist.code(),
                enum_tag(&activation.status)?,
                enum_tag(&activation.verdict)?,
                activation.recorded_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // === Remediation Claims ===

    /// Atomically claim `units` of `group_key` for `directive_id`.
    ///
    /// Either every unit ends up held by `directive_id` or nothing changes and
    /// the holder of the first conflicting unit is returned.
    pub fn claim_units(
        &mut self,
        group_key: &str,
        units: &BTreeSet<String>,
        directive_id: &str,
    ) -> Result<ClaimOutcome> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = chrono::Utc::now().to_rfc3339();
        for unit in units {
            tx.execute(
                "INSERT OR IGNORE INTO remediation_claims (group_key, unit, directive_id, claimed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![group_key, unit, directive_id, now],
            )?;
            let holder: String = tx.query_row(
                "SELECT directive_id FROM remediation_claims WHERE group_key = ?1 AND unit = ?2",
                params![group_key, unit],
                |row| row.get(0),
            )?;
            if holder != directive_id {
                // Dropping the transaction rolls back units claimed so far.
                return Ok(ClaimOutcome::HeldBy(holder));
            }
        }
        tx.commit()?;
        Ok(ClaimOutcome::Claimed)
    }

    /// Current holder of a claim, if any.
    pub fn claim_holder(&self, group_key: &str, unit: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT directive_id FROM remediation_claims WHERE group_key = ?1 AND unit = ?2",
                params![group_key, unit],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Release every claim held by `directive_id`. Returns the number released.
    pub fn release_claims(&mut self, directive_id: &str) -> Result<usize> {
        let released = self.conn.execute(
            "DELETE FROM remediation_claims WHERE directive_id = ?1",
            [directive_id],
        )?;
        Ok(released)
    }
}

/// Append one record as a single write so concurrent appenders never
/// interleave within a line.
fn append_to<T: Record>(root: &Path, record: &T) -> Result<()> {
    let path = root.join(T::FILE);
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    file.write_all(line.as_bytes())?;
    Ok(())
}

fn write_directive_row(conn: &Connection, directive: &Directive) -> Result<()> {
    let group_key = directive.remediation().map(|tag| tag.group_key);
    conn.execute(
        "INSERT OR REPLACE INTO directives
         (id, title, status, current_phase, priority, relationship_type, parent_id,
          progress, group_key, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            directive.id,
            directive.title,
            directive.status.as_str(),
            directive.current_phase.as_str(),
            directive.priority.as_str(),
            directive.relationship_type.to_string(),
            directive.parent_id,
            directive.progress,
            group_key,
            directive.created_at.to_rfc3339(),
            directive.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Conditional form of [`write_directive_row`]; true if the row was updated.
fn update_directive_row(conn: &Connection, directive: &Directive, guard: DirectiveGuard<'_>) -> Result<bool> {
    let (clause, expected) = match guard {
        DirectiveGuard::ParentFreeOr(parent_id) => {
            ("(parent_id IS NULL OR parent_id = ?12)", parent_id.to_string())
        }
        DirectiveGuard::AtPhase(phase) => ("current_phase = ?12", phase.as_str().to_string()),
    };
    let sql = format!(
        "UPDATE directives
         SET title = ?2, status = ?3, current_phase = ?4, priority = ?5, relationship_type = ?6,
             parent_id = ?7, progress = ?8, group_key = ?9, created_at = ?10, updated_at = ?11
         WHERE id = ?1 AND {}",
        clause
    );
    let group_key = directive.remediation().map(|tag| tag.group_key);
    let changed = conn.execute(
        &sql,
        params![
            directive.id,
            directive.title,
            directive.status.as_str(),
            directive.current_phase.as_str(),
            directive.priority.as_str(),
            directive.relationship_type.to_string(),
            directive.parent_id,
            directive.progress,
            group_key,
            directive.created_at.to_rfc3339(),
            directive.updated_at.to_rfc3339(),
            expected,
        ],
    )?;
    Ok(changed > 0)
}

fn write_handoff_row(conn: &Connection, packet: &HandoffPacket) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO handoffs
         (id, directive_id, from_phase, to_phase, status, system, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            packet.id,
            packet.directive_id,
            packet.from_phase.as_str(),
            packet.to_phase.as_str(),
            packet.status.to_string(),
            packet.system,
            packet.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

/// Serialized name of a unit-variant enum (e.g. `Verdict::Pass` -> `"pass"`).
fn enum_tag<T: Serialize>(value: &T) -> Result<String> {
    Ok(match serde_json::to_value(value)? {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Parent directory for all Helmsman data: `$HM_DATA_DIR/helmsman` or the
/// platform data dir.
pub fn data_root() -> Result<PathBuf> {
    let base = match std::env::var_os("HM_DATA_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::data_dir()
            .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))?,
    };
    Ok(base.join("helmsman"))
}

/// Get the storage directory for a repository.
///
/// Uses a hash of the repository path to create a unique directory
/// under [`data_root`].
pub fn get_storage_dir(repo_path: &Path) -> Result<PathBuf> {
    let root = data_root()?;
    Ok(root.join(repo_hash(repo_path)?))
}

fn storage_dir_in(repo_path: &Path, data_dir: &Path) -> Result<PathBuf> {
    Ok(data_dir.join("helmsman").join(repo_hash(repo_path)?))
}

fn repo_hash(repo_path: &Path) -> Result<String> {
    let repo_canonical = repo_path.canonicalize().map_err(|e| {
        Error::InvalidInput(format!(
            "Could not canonicalize repo path {}: {}",
            repo_path.display(),
            e
        ))
    })?;

    let mut hasher = Sha256::new();
    hasher.update(repo_canonical.to_string_lossy().as_bytes());
    let hash_hex = format!("{:x}", hasher.finalize());
    Ok(hash_hex[..12].to_string())
}

/// Generate an ID.
///
/// Format: `<prefix>-<4 hex chars>`, e.g. `hm-3f9a` for a directive.
pub fn generate_id(prefix: &str, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(
        chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(0)
            .to_le_bytes(),
    );
    let hash_hex = format!("{:x}", hasher.finalize());
    format!("{}-{}", prefix, &hash_hex[..4])
}

/// Validate that an ID matches the expected format.
pub fn validate_id(id: &str, prefix: &str) -> Result<()> {
    let Some(suffix) = id.strip_prefix(&format!("{}-", prefix)) else {
        return Err(Error::InvalidId(format!(
            "ID must start with '{}-', got: {}",
            prefix, id
        )));
    };

    if suffix.len() != 4 || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidId(format!(
            "ID suffix must be 4 hex characters, got: {}",
            suffix
        )));
    }

    Ok(())
}

/// Validate a directive ID (hm-xxxx format).
pub fn validate_directive_id(id: &str) -> Result<()> {
    validate_id(id, DIRECTIVE_PREFIX)
}
