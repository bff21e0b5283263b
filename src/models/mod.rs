//! Data models for Helmsman entities.
//!
//! This module defines the core data structures:
//! - `Directive` - Governed units of work with status, phase, priority and hierarchy
//! - `DependencyEdge` - Ordered chain link between two sibling children
//! - `HandoffPacket` - Record of a phase transition attempt
//! - `SubAgentActivation` - Outcome of a specialist review
//! - `Violation` - A compliance failure awaiting remediation
//!
//! Contracts live in [`contract`], the arena-indexed hierarchy in [`graph`].

pub mod contract;
pub mod graph;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub use contract::{Contract, ContractKind, ContractRef, ContractSpec, DataContract, UxContract};

/// Metadata key holding the inherited contract chain (nearest-first).
pub const META_INHERITED_CONTRACTS: &str = "inherited_contracts";

/// Metadata key holding remediation linkage for spawned directives.
pub const META_REMEDIATION: &str = "remediation";

/// Metadata keys maintained by the store; callers cannot set them directly.
pub const RESERVED_METADATA_KEYS: [&str; 2] = [META_INHERITED_CONTRACTS, META_REMEDIATION];

/// Directive status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveStatus {
    #[default]
    Draft,
    PendingApproval,
    Active,
    InProgress,
    Completed,
    Cancelled,
}

impl DirectiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingApproval => "pending_approval",
            Self::Active => "active",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed and cancelled directives accept no further work.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for DirectiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DirectiveStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "draft" => Ok(Self::Draft),
            "pending_approval" => Ok(Self::PendingApproval),
            "active" => Ok(Self::Active),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// Lifecycle phase. Declaration order is the only legal forward order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    #[default]
    Lead,
    Plan,
    Exec,
    PlanVerify,
    LeadFinal,
    Complete,
}

impl Phase {
    pub fn all() -> &'static [Phase] {
        &[
            Phase::Lead,
            Phase::Plan,
            Phase::Exec,
            Phase::PlanVerify,
            Phase::LeadFinal,
            Phase::Complete,
        ]
    }

    /// The immediate successor, or `None` for `COMPLETE`.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Lead => Some(Phase::Plan),
            Phase::Plan => Some(Phase::Exec),
            Phase::Exec => Some(Phase::PlanVerify),
            Phase::PlanVerify => Some(Phase::LeadFinal),
            Phase::LeadFinal => Some(Phase::Complete),
            Phase::Complete => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Lead => "LEAD",
            Phase::Plan => "PLAN",
            Phase::Exec => "EXEC",
            Phase::PlanVerify => "PLAN_VERIFY",
            Phase::LeadFinal => "LEAD_FINAL",
            Phase::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "LEAD" => Ok(Phase::Lead),
            "PLAN" => Ok(Phase::Plan),
            "EXEC" => Ok(Phase::Exec),
            "PLAN_VERIFY" => Ok(Phase::PlanVerify),
            "LEAD_FINAL" => Ok(Phase::LeadFinal),
            "COMPLETE" => Ok(Phase::Complete),
            _ => Err(format!("Invalid phase: {}", s)),
        }
    }
}

/// Directive priority. Ordered lowest to highest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Rollup weight of a child with this priority.
    pub fn weight(&self) -> u32 {
        match self {
            Priority::Critical => 40,
            Priority::High => 30,
            Priority::Medium => 20,
            Priority::Low => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// Position of a directive in the decomposition hierarchy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    #[default]
    Standalone,
    Parent,
    Child,
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationshipType::Standalone => "standalone",
            RelationshipType::Parent => "parent",
            RelationshipType::Child => "child",
        };
        write!(f, "{}", s)
    }
}

/// Technical surface a directive declares; drives PLAN-phase specialist requirements.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TechnicalSurface {
    Database,
    Security,
    Ui,
    Integration,
    Performance,
}

impl fmt::Display for TechnicalSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TechnicalSurface::Database => "database",
            TechnicalSurface::Security => "security",
            TechnicalSurface::Ui => "ui",
            TechnicalSurface::Integration => "integration",
            TechnicalSurface::Performance => "performance",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for TechnicalSurface {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "database" | "db" => Ok(TechnicalSurface::Database),
            "security" | "auth" => Ok(TechnicalSurface::Security),
            "ui" | "design" => Ok(TechnicalSurface::Ui),
            "integration" | "api" => Ok(TechnicalSurface::Integration),
            "performance" | "perf" => Ok(TechnicalSurface::Performance),
            _ => Err(format!("Invalid technical surface: {}", s)),
        }
    }
}

/// A governed unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directive {
    /// Unique identifier (e.g., "hm-a1b2")
    pub id: String,

    /// Entity type marker
    #[serde(rename = "type")]
    pub entity_type: String,

    pub title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub status: DirectiveStatus,

    #[serde(default)]
    pub current_phase: Phase,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub relationship_type: RelationshipType,

    /// Owning parent; required for children, absent otherwise
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// 0-100; derived for parents, set directly for leaves
    #[serde(default)]
    pub progress: u8,

    #[serde(default)]
    pub technical_surface: BTreeSet<TechnicalSurface>,

    /// Open key-value bag (contract chain, remediation linkage, caller tags)
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Directive {
    /// Create a new standalone draft directive at LEAD.
    pub fn new(id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            entity_type: "directive".to_string(),
            title,
            description: None,
            status: DirectiveStatus::default(),
            current_phase: Phase::default(),
            priority: Priority::default(),
            relationship_type: RelationshipType::default(),
            parent_id: None,
            progress: 0,
            technical_surface: BTreeSet::new(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_parent(&self) -> bool {
        self.relationship_type == RelationshipType::Parent
    }

    pub fn is_child(&self) -> bool {
        self.relationship_type == RelationshipType::Child
    }

    /// Remediation linkage, if this directive was spawned for a violation group.
    pub fn remediation(&self) -> Option<RemediationTag> {
        self.metadata
            .get(META_REMEDIATION)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_remediation(&mut self, tag: &RemediationTag) -> crate::Result<()> {
        self.metadata
            .insert(META_REMEDIATION.to_string(), serde_json::to_value(tag)?);
        Ok(())
    }

    /// Inherited contract chain recorded on this directive (nearest-first).
    pub fn inherited_contracts(&self) -> Vec<ContractRef> {
        self.metadata
            .get(META_INHERITED_CONTRACTS)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    pub fn set_inherited_contracts(&mut self, refs: &[ContractRef]) -> crate::Result<()> {
        if refs.is_empty() {
            self.metadata.remove(META_INHERITED_CONTRACTS);
        } else {
            self.metadata.insert(
                META_INHERITED_CONTRACTS.to_string(),
                serde_json::to_value(refs)?,
            );
        }
        Ok(())
    }
}

/// Remediation linkage stored in a spawned directive's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationTag {
    pub group_key: String,
    pub affected_units: BTreeSet<String>,
    pub source_rules: BTreeSet<String>,
    pub check_id: String,
}

/// Ordered link between two sibling children: `before_id` must finish first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// Entity type marker
    #[serde(rename = "type")]
    pub entity_type: String,

    pub parent_id: String,
    pub before_id: String,
    pub after_id: String,
    pub created_at: DateTime<Utc>,
}

impl DependencyEdge {
    pub fn new(parent_id: String, before_id: String, after_id: String) -> Self {
        Self {
            entity_type: "dependency".to_string(),
            parent_id,
            before_id,
            after_id,
            created_at: Utc::now(),
        }
    }
}

/// Status of a handoff packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    #[default]
    PendingAcceptance,
    Accepted,
    Rejected,
}

impl fmt::Display for HandoffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandoffStatus::PendingAcceptance => "pending_acceptance",
            HandoffStatus::Accepted => "accepted",
            HandoffStatus::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// The seven narrative fields every handoff must carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketContent {
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub deliverables_manifest: String,
    #[serde(default)]
    pub completeness_report: String,
    #[serde(default)]
    pub key_decisions: String,
    #[serde(default)]
    pub known_issues: String,
    #[serde(default)]
    pub resource_utilization: String,
    #[serde(default)]
    pub action_items: String,
}

impl PacketContent {
    /// Names of fields that are empty or whitespace-only.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("executive_summary", &self.executive_summary),
            ("deliverables_manifest", &self.deliverables_manifest),
            ("completeness_report", &self.completeness_report),
            ("key_decisions", &self.key_decisions),
            ("known_issues", &self.known_issues),
            ("resource_utilization", &self.resource_utilization),
            ("action_items", &self.action_items),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// Why a handoff was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Error kind, e.g. "IncompletePacket"
    pub code: String,
    pub detail: String,
}

/// A phase transition attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffPacket {
    /// Unique identifier (e.g., "hmh-a1b2")
    pub id: String,

    /// Entity type marker
    #[serde(rename = "type")]
    pub entity_type: String,

    pub directive_id: String,
    pub from_phase: Phase,
    pub to_phase: Phase,

    #[serde(default)]
    pub status: HandoffStatus,

    #[serde(flatten)]
    pub content: PacketContent,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,

    /// Recorded by the engine rather than a caller (parent auto-completion)
    #[serde(default)]
    pub system: bool,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl HandoffPacket {
    pub fn new(
        id: String,
        directive_id: String,
        from_phase: Phase,
        to_phase: Phase,
        content: PacketContent,
    ) -> Self {
        Self {
            id,
            entity_type: "handoff".to_string(),
            directive_id,
            from_phase,
            to_phase,
            status: HandoffStatus::PendingAcceptance,
            content,
            rejection: None,
            system: false,
            created_at: Utc::now(),
            decided_at: None,
        }
    }
}

/// Closed set of specialist reviewers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Specialist {
    Database,
    Security,
    Design,
    Testing,
    Performance,
    Integration,
    Documentation,
}

impl Specialist {
    pub fn code(&self) -> &'static str {
        match self {
            Specialist::Database => "DATABASE",
            Specialist::Security => "SECURITY",
            Specialist::Design => "DESIGN",
            Specialist::Testing => "TESTING",
            Specialist::Performance => "PERFORMANCE",
            Specialist::Integration => "INTEGRATION",
            Specialist::Documentation => "DOCUMENTATION",
        }
    }
}

impl fmt::Display for Specialist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for Specialist {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DATABASE" => Ok(Specialist::Database),
            "SECURITY" => Ok(Specialist::Security),
            "DESIGN" => Ok(Specialist::Design),
            "TESTING" => Ok(Specialist::Testing),
            "PERFORMANCE" => Ok(Specialist::Performance),
            "INTEGRATION" => Ok(Specialist::Integration),
            "DOCUMENTATION" | "DOCMON" => Ok(Specialist::Documentation),
            _ => Err(format!("Unknown specialist: {}", s)),
        }
    }
}

/// Run state of a specialist activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationStatus {
    Activated,
    Completed,
    Skipped,
}

impl std::str::FromStr for ActivationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "activated" => Ok(ActivationStatus::Activated),
            "completed" => Ok(ActivationStatus::Completed),
            "skipped" => Ok(ActivationStatus::Skipped),
            _ => Err(format!("Invalid activation status: {}", s)),
        }
    }
}

/// Outcome reported by a specialist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Conditional,
}

impl std::str::FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pass" => Ok(Verdict::Pass),
            "fail" => Ok(Verdict::Fail),
            "conditional" => Ok(Verdict::Conditional),
            _ => Err(format!("Invalid verdict: {}", s)),
        }
    }
}

/// Record that a specialist review ran for a directive in a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentActivation {
    /// Unique identifier (e.g., "hma-a1b2")
    pub id: String,

    /// Entity type marker
    #[serde(rename = "type")]
    pub entity_type: String,

    pub directive_id: String,
    pub phase: Phase,
    pub specialist: Specialist,
    pub status: ActivationStatus,
    pub verdict: Verdict,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,

    pub recorded_at: DateTime<Utc>,
}

impl SubAgentActivation {
    pub fn new(
        id: String,
        directive_id: String,
        phase: Phase,
        specialist: Specialist,
        status: ActivationStatus,
        verdict: Verdict,
    ) -> Self {
        Self {
            id,
            entity_type: "activation".to_string(),
            directive_id,
            phase,
            specialist,
            status,
            verdict,
            summary: None,
            recorded_at: Utc::now(),
        }
    }
}

/// Violation severity. Ordered lowest to highest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<Severity> for Priority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => Priority::Low,
            Severity::Medium => Priority::Medium,
            Severity::High => Priority::High,
            Severity::Critical => Priority::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Priority::from(*self))
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// Violation lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationStatus {
    #[default]
    Open,
    Acknowledged,
    Resolved,
}

impl fmt::Display for ViolationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationStatus::Open => "open",
            ViolationStatus::Acknowledged => "acknowledged",
            ViolationStatus::Resolved => "resolved",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for ViolationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(ViolationStatus::Open),
            "acknowledged" => Ok(ViolationStatus::Acknowledged),
            "resolved" => Ok(ViolationStatus::Resolved),
            _ => Err(format!("Invalid violation status: {}", s)),
        }
    }
}

/// One detected compliance failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// Unique identifier (e.g., "hmv-a1b2")
    pub id: String,

    /// Entity type marker
    #[serde(rename = "type")]
    pub entity_type: String,

    /// Compliance check run that produced this finding
    pub check_id: String,

    pub rule_id: String,
    pub severity: Severity,

    /// Affected unit (e.g., a stage number)
    pub affected_unit: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub status: ViolationStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation_directive_id: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Violation {
    pub fn new(
        id: String,
        check_id: String,
        rule_id: String,
        severity: Severity,
        affected_unit: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            entity_type: "violation".to_string(),
            check_id,
            rule_id,
            severity,
            affected_unit,
            message: None,
            status: ViolationStatus::Open,
            remediation_directive_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
