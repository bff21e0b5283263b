//! CLI argument definitions for Helmsman.

use clap::{Parser, Subcommand};

/// Helmsman - governance for phased, hierarchical directives.
///
/// Directives move through LEAD, PLAN, EXEC, PLAN_VERIFY, LEAD_FINAL and
/// COMPLETE by handoff. Start with `hm system init`, then `hm directive create`.
#[derive(Parser, Debug)]
#[command(name = "hm")]
#[command(author, version, about = "Govern directives through a phased review lifecycle", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Run as if hm was started in <path> instead of the current directory.
    /// Can also be set via HM_REPO environment variable.
    #[arg(short = 'C', long = "repo", global = true, env = "HM_REPO")]
    pub repo_path: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Directive management (create, hierarchy, progress)
    Directive {
        #[command(subcommand)]
        command: DirectiveCommands,
    },

    /// Phase handoffs
    Handoff {
        #[command(subcommand)]
        command: HandoffCommands,
    },

    /// Specialist activation records
    Activation {
        #[command(subcommand)]
        command: ActivationCommands,
    },

    /// Specialist requirements per phase
    Requirements {
        #[command(subcommand)]
        command: RequirementsCommands,
    },

    /// Data and UX contracts
    Contract {
        #[command(subcommand)]
        command: ContractCommands,
    },

    /// Compliance violations
    Violation {
        #[command(subcommand)]
        command: ViolationCommands,
    },

    /// Group violations and spawn remediation directives
    Remediate {
        #[command(subcommand)]
        command: RemediateCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// System administration
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },

    /// Show recent entries of the action log
    Log {
        /// Number of entries to show (most recent last)
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

/// Directive subcommands
#[derive(Subcommand, Debug)]
pub enum DirectiveCommands {
    /// Create a new directive
    Create {
        /// Directive title
        title: String,

        /// Description
        #[arg(short, long)]
        description: Option<String>,

        /// Priority (critical, high, medium, low)
        #[arg(short, long)]
        priority: Option<String>,

        /// Technical surface (database, security, ui, integration, performance)
        #[arg(short, long = "surface")]
        surface: Vec<String>,

        /// Parent directive; the new directive starts at PLAN
        #[arg(long)]
        parent: Option<String>,

        /// Metadata entry as key=value (value parsed as JSON when possible)
        #[arg(long = "meta")]
        meta: Vec<String>,
    },

    /// Show a directive
    Show {
        /// Directive ID (e.g., hm-a1b2)
        id: String,
    },

    /// List directives
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,

        /// Filter by phase
        #[arg(long)]
        phase: Option<String>,

        /// Filter by parent directive
        #[arg(long)]
        parent: Option<String>,
    },

    /// Place a directive under a parent
    SetParent {
        /// Child directive ID
        child: String,
        /// Parent directive ID
        parent: String,
    },

    /// Remove a directive from its parent
    Detach {
        /// Child directive ID
        child: String,
    },

    /// Set progress (0-100) of a non-parent directive
    Progress {
        /// Directive ID
        id: String,
        /// Progress percentage
        value: u8,
    },

    /// Set status manually (completed is reached only via handoff)
    Status {
        /// Directive ID
        id: String,
        /// New status (draft, pending_approval, active, in_progress, cancelled)
        status: String,
    },

    /// List children in chain order
    Children {
        /// Parent directive ID
        id: String,
    },

    /// List ancestors, nearest first
    Ancestors {
        /// Directive ID
        id: String,
    },

    /// Create children in order, linked into one sequential chain
    Decompose {
        /// Parent directive ID
        id: String,
        /// Child titles, in execution order
        #[arg(required = true)]
        titles: Vec<String>,
    },

    /// Link two sibling children: <before> must complete before <after> advances
    Chain {
        /// Directive that runs first
        before: String,
        /// Directive that runs second
        after: String,
    },

    /// Recommend the next action for a directive
    Next {
        /// Directive ID
        id: String,
    },

    /// Structural report on a parent's children
    ValidateChildren {
        /// Parent directive ID
        id: String,
    },
}

/// Handoff subcommands
#[derive(Subcommand, Debug)]
pub enum HandoffCommands {
    /// Request a phase transition
    Request {
        /// Directive ID
        id: String,

        /// Phase the directive is leaving
        #[arg(long)]
        from: String,

        /// Phase the directive is entering
        #[arg(long)]
        to: String,

        /// Packet JSON file with the seven handoff fields ('-' for stdin)
        #[arg(long)]
        packet: String,
    },

    /// List handoff packets of a directive, oldest first
    List {
        /// Directive ID
        id: String,
    },
}

/// Activation subcommands
#[derive(Subcommand, Debug)]
pub enum ActivationCommands {
    /// Record a specialist review
    Record {
        /// Directive ID
        id: String,

        /// Phase the review ran in
        #[arg(long)]
        phase: String,

        /// Specialist code (e.g., DATABASE, TESTING)
        #[arg(long)]
        specialist: String,

        /// Run state (activated, completed, skipped)
        #[arg(long, default_value = "completed")]
        status: String,

        /// Verdict (pass, fail, conditional)
        #[arg(long)]
        verdict: String,

        /// Short summary of the review
        #[arg(long)]
        summary: Option<String>,
    },

    /// List activations of a directive in a phase
    List {
        /// Directive ID
        id: String,

        /// Phase
        #[arg(long)]
        phase: String,
    },
}

/// Requirements subcommands
#[derive(Subcommand, Debug)]
pub enum RequirementsCommands {
    /// Show the specialists a phase requires
    Show {
        /// Phase
        phase: String,

        /// Resolve against this directive's technical surface
        #[arg(long)]
        directive: Option<String>,
    },

    /// Check whether a directive has met a phase's requirements
    Check {
        /// Directive ID
        id: String,
        /// Phase
        phase: String,
    },
}

/// Contract subcommands
#[derive(Subcommand, Debug)]
pub enum ContractCommands {
    /// Attach a contract from a JSON file ('-' for stdin)
    Attach {
        /// Directive ID
        id: String,

        /// Contract JSON with a "kind" of "data" or "ux"
        #[arg(long)]
        file: String,
    },

    /// Show contracts visible from a directive, nearest first
    Resolve {
        /// Directive ID
        id: String,
    },

    /// Validate a data operation against the nearest data contract
    ValidateData {
        /// Directive ID
        id: String,

        /// Free-text or SQL-like description of the change
        #[arg(long, conflicts_with = "entity", required_unless_present = "entity")]
        op: Option<String>,

        /// Entity touched, as table or table.column (repeatable)
        #[arg(long)]
        entity: Vec<String>,
    },

    /// Validate a UI change against the nearest UX contract
    ValidateUx {
        /// Directive ID
        id: String,

        /// Component path
        path: String,

        /// Component size in lines
        #[arg(long)]
        lines: Option<u32>,

        /// Accessibility level reached (1 = A, 2 = AA, 3 = AAA)
        #[arg(long)]
        a11y_level: Option<u8>,
    },
}

/// Violation subcommands
#[derive(Subcommand, Debug)]
pub enum ViolationCommands {
    /// Record a violation from a compliance check
    Add {
        /// Compliance check run ID
        #[arg(long)]
        check: String,

        /// Rule identifier (e.g., CREWAI-001)
        #[arg(long)]
        rule: String,

        /// Severity (critical, high, medium, low)
        #[arg(long)]
        severity: String,

        /// Affected unit (e.g., a stage number)
        #[arg(long)]
        unit: String,

        /// Finding details
        #[arg(long)]
        message: Option<String>,
    },

    /// List violations
    List {
        /// Filter by check run
        #[arg(long)]
        check: Option<String>,

        /// Filter by status (open, acknowledged, resolved)
        #[arg(long)]
        status: Option<String>,
    },
}

/// Remediation subcommands
#[derive(Subcommand, Debug)]
pub enum RemediateCommands {
    /// Show open violations of a check grouped by root cause
    Groups {
        /// Compliance check run ID
        check: String,
    },

    /// Spawn or link remediation directives for every group
    Run {
        /// Compliance check run ID
        check: String,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved configuration with value sources
    Show,

    /// Set a value in this repository's session config
    Set {
        /// Configuration key
        name: String,
        /// Configuration value
        value: String,
    },
}

/// System administration subcommands
#[derive(Subcommand, Debug)]
pub enum SystemCommands {
    /// Initialize helmsman for this repository
    Init,

    /// Show version, build and store information
    Info,

    /// Rebuild the SQLite cache from the JSONL files
    RebuildCache,
}
