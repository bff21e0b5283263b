//! Helmsman CLI - governs directives through a phased review lifecycle.

use helmsman::action_log;
use helmsman::cli::{
    ActivationCommands, Cli, Commands, ConfigCommands, ContractCommands, DirectiveCommands,
    HandoffCommands, RemediateCommands, RequirementsCommands, SystemCommands, ViolationCommands,
};
use helmsman::commands::{self, Output};
use helmsman::config::{self, ConfigOverrides, OutputFormat, ResolvedConfig};
use helmsman::storage::{get_storage_dir, Storage};
use clap::Parser;
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

fn main() {
    let cli = Cli::parse();
    init_tracing();

    // Determine repo path: --repo flag > HM_REPO env > cwd
    let repo_path = resolve_repo_path(cli.repo_path, cli.human_readable);

    let mut overrides = ConfigOverrides::new();
    if cli.human_readable {
        overrides = overrides.with_output_format(OutputFormat::Human);
    }
    let resolved = match load_config(&repo_path, &overrides) {
        Ok(resolved) => resolved,
        Err(e) => {
            report_error(&e, cli.human_readable);
            process::exit(e.exit_code());
        }
    };
    let human = resolved.output_format() == OutputFormat::Human;

    let (cmd_name, args_json) = serialize_command(&cli.command);
    let start = Instant::now();

    let result = run_command(cli.command, &repo_path, &resolved, human);

    let duration = start.elapsed().as_millis() as u64;
    let (success, error) = match &result {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };
    if let Some(log_path) = resolved.action_log_target() {
        action_log::log_action(log_path, &repo_path, &cmd_name, args_json, success, error, duration);
    }

    if let Err(e) = result {
        report_error(&e, human);
        process::exit(e.exit_code());
    }
}

/// Diagnostics go to stderr so stdout stays parseable. `HM_LOG` takes an
/// EnvFilter directive; `HM_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("HM_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time();
    if env::var("HM_LOG_FORMAT").is_ok_and(|f| f == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolve the repository path based on explicit flag or environment variable.
///
/// An explicit path must exist; otherwise the current directory is used.
fn resolve_repo_path(explicit_path: Option<PathBuf>, human: bool) -> PathBuf {
    match explicit_path {
        Some(path) => {
            if !path.exists() {
                let e = helmsman::Error::InvalidInput(format!(
                    "Specified repo path does not exist: {}",
                    path.display()
                ));
                report_error(&e, human);
                process::exit(e.exit_code());
            }
            path
        }
        None => env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// System config, then the session config of an initialized store, then flags.
fn load_config(repo_path: &Path, overrides: &ConfigOverrides) -> helmsman::Result<ResolvedConfig> {
    let session_path = if Storage::exists(repo_path)? {
        Some(get_storage_dir(repo_path)?.join("config.kdl"))
    } else {
        None
    };
    config::resolve_config(session_path.as_deref(), overrides)
}

fn report_error(e: &helmsman::Error, human: bool) {
    if human {
        eprintln!("Error: {}", e);
    } else {
        let err = serde_json::json!({
            "error": e.to_string(),
            "code": e.code(),
            "category": e.category(),
        });
        eprintln!("{}", err);
    }
}

fn run_command(
    command: Commands,
    repo_path: &Path,
    resolved: &ResolvedConfig,
    human: bool,
) -> Result<(), helmsman::Error> {
    match command {
        Commands::Directive { command } => match command {
            DirectiveCommands::Create {
                title,
                description,
                priority,
                surface,
                parent,
                meta,
            } => {
                let args = commands::CreateArgs {
                    title,
                    description,
                    priority,
                    surface,
                    parent,
                    meta,
                };
                let result = commands::directive_create(repo_path, args, resolved.default_priority())?;
                output(&result, human);
            }
            DirectiveCommands::Show { id } => {
                let result = commands::directive_show(repo_path, &id)?;
                output(&result, human);
            }
            DirectiveCommands::List {
                status,
                phase,
                parent,
            } => {
                let result = commands::directive_list(
                    repo_path,
                    status.as_deref(),
                    phase.as_deref(),
                    parent.as_deref(),
                )?;
                output(&result, human);
            }
            DirectiveCommands::SetParent { child, parent } => {
                let result = commands::directive_set_parent(repo_path, &child, &parent)?;
                output(&result, human);
            }
            DirectiveCommands::Detach { child } => {
                let result = commands::directive_detach(repo_path, &child)?;
                output(&result, human);
            }
            DirectiveCommands::Progress { id, value } => {
                let result = commands::directive_progress(repo_path, &id, value)?;
                output(&result, human);
            }
            DirectiveCommands::Status { id, status } => {
                let result = commands::directive_status(repo_path, &id, &status)?;
                output(&result, human);
            }
            DirectiveCommands::Children { id } => {
                let result = commands::directive_children(repo_path, &id)?;
                output(&result, human);
            }
            DirectiveCommands::Ancestors { id } => {
                let result = commands::directive_ancestors(repo_path, &id)?;
                output(&result, human);
            }
            DirectiveCommands::Decompose { id, titles } => {
                let result =
                    commands::directive_decompose(repo_path, &id, titles, resolved.default_priority())?;
                output(&result, human);
            }
            DirectiveCommands::Chain { before, after } => {
                let result = commands::directive_chain(repo_path, &before, &after)?;
                output(&result, human);
            }
            DirectiveCommands::Next { id } => {
                let result = commands::directive_next(repo_path, &id)?;
                output(&result, human);
            }
            DirectiveCommands::ValidateChildren { id } => {
                let result = commands::directive_validate_children(repo_path, &id)?;
                output(&result, human);
            }
        },

        Commands::Handoff { command } => match command {
            HandoffCommands::Request {
                id,
                from,
                to,
                packet,
            } => {
                let result = commands::handoff_request(
                    repo_path,
                    &id,
                    &from,
                    &to,
                    &packet,
                    resolved.activation_cache_ttl(),
                )?;
                output(&result, human);
            }
            HandoffCommands::List { id } => {
                let result = commands::handoff_list(repo_path, &id)?;
                output(&result, human);
            }
        },

        Commands::Activation { command } => match command {
            ActivationCommands::Record {
                id,
                phase,
                specialist,
                status,
                verdict,
                summary,
            } => {
                let args = commands::ActivationArgs {
                    id,
                    phase,
                    specialist,
                    status,
                    verdict,
                    summary,
                };
                let result = commands::activation_record(repo_path, args)?;
                output(&result, human);
            }
            ActivationCommands::List { id, phase } => {
                let result = commands::activation_list(repo_path, &id, &phase)?;
                output(&result, human);
            }
        },

        Commands::Requirements { command } => match command {
            RequirementsCommands::Show { phase, directive } => {
                let result = commands::requirements_show(repo_path, &phase, directive.as_deref())?;
                output(&result, human);
            }
            RequirementsCommands::Check { id, phase } => {
                let result = commands::requirements_check(
                    repo_path,
                    &id,
                    &phase,
                    resolved.activation_cache_ttl(),
                )?;
                output(&result, human);
            }
        },

        Commands::Contract { command } => match command {
            ContractCommands::Attach { id, file } => {
                let result = commands::contract_attach(repo_path, &id, &file)?;
                output(&result, human);
            }
            ContractCommands::Resolve { id } => {
                let result = commands::contract_resolve(repo_path, &id)?;
                output(&result, human);
            }
            ContractCommands::ValidateData { id, op, entity } => {
                let result =
                    commands::contract_validate_data(repo_path, &id, op.as_deref(), &entity)?;
                output(&result, human);
            }
            ContractCommands::ValidateUx {
                id,
                path,
                lines,
                a11y_level,
            } => {
                let result = commands::contract_validate_ux(repo_path, &id, &path, lines, a11y_level)?;
                output(&result, human);
            }
        },

        Commands::Violation { command } => match command {
            ViolationCommands::Add {
                check,
                rule,
                severity,
                unit,
                message,
            } => {
                let args = commands::ViolationArgs {
                    check,
                    rule,
                    severity,
                    unit,
                    message,
                };
                let result = commands::violation_add(repo_path, args)?;
                output(&result, human);
            }
            ViolationCommands::List { check, status } => {
                let result =
                    commands::violation_list(repo_path, check.as_deref(), status.as_deref())?;
                output(&result, human);
            }
        },

        Commands::Remediate { command } => match command {
            RemediateCommands::Groups { check } => {
                let result = commands::remediate_groups(repo_path, &check)?;
                output(&result, human);
            }
            RemediateCommands::Run { check } => {
                let result = commands::remediate_run(repo_path, &check)?;
                output(&result, human);
            }
        },

        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                output(&commands::config_show(resolved), human);
            }
            ConfigCommands::Set { name, value } => {
                let result = commands::config_set(repo_path, &name, &value)?;
                output(&result, human);
            }
        },

        Commands::System { command } => match command {
            SystemCommands::Init => {
                let result = commands::system_init(repo_path)?;
                output(&result, human);
            }
            SystemCommands::Info => {
                let result = commands::system_info(repo_path)?;
                output(&result, human);
            }
            SystemCommands::RebuildCache => {
                let result = commands::system_rebuild_cache(repo_path)?;
                output(&result, human);
            }
        },

        Commands::Log { limit } => {
            let result = commands::log_show(resolved, limit)?;
            output(&result, human);
        }
    }
    Ok(())
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

/// Serialize command to extract name and arguments for logging.
fn serialize_command(command: &Commands) -> (String, serde_json::Value) {
    use serde_json::json;

    match command {
        Commands::Directive { command } => match command {
            DirectiveCommands::Create {
                title,
                description,
                priority,
                surface,
                parent,
                meta,
            } => (
                "directive create".to_string(),
                json!({
                    "title": title,
                    "description": description,
                    "priority": priority,
                    "surface": surface,
                    "parent": parent,
                    "meta": meta,
                }),
            ),
            DirectiveCommands::Show { id } => ("directive show".to_string(), json!({ "id": id })),
            DirectiveCommands::List {
                status,
                phase,
                parent,
            } => (
                "directive list".to_string(),
                json!({ "status": status, "phase": phase, "parent": parent }),
            ),
            DirectiveCommands::SetParent { child, parent } => (
                "directive set-parent".to_string(),
                json!({ "child": child, "parent": parent }),
            ),
            DirectiveCommands::Detach { child } => {
                ("directive detach".to_string(), json!({ "child": child }))
            }
            DirectiveCommands::Progress { id, value } => (
                "directive progress".to_string(),
                json!({ "id": id, "value": value }),
            ),
            DirectiveCommands::Status { id, status } => (
                "directive status".to_string(),
                json!({ "id": id, "status": status }),
            ),
            DirectiveCommands::Children { id } => {
                ("directive children".to_string(), json!({ "id": id }))
            }
            DirectiveCommands::Ancestors { id } => {
                ("directive ancestors".to_string(), json!({ "id": id }))
            }
            DirectiveCommands::Decompose { id, titles } => (
                "directive decompose".to_string(),
                json!({ "id": id, "titles": titles }),
            ),
            DirectiveCommands::Chain { before, after } => (
                "directive chain".to_string(),
                json!({ "before": before, "after": after }),
            ),
            DirectiveCommands::Next { id } => ("directive next".to_string(), json!({ "id": id })),
            DirectiveCommands::ValidateChildren { id } => (
                "directive validate-children".to_string(),
                json!({ "id": id }),
            ),
        },

        Commands::Handoff { command } => match command {
            HandoffCommands::Request {
                id,
                from,
                to,
                packet,
            } => (
                "handoff request".to_string(),
                json!({ "id": id, "from": from, "to": to, "packet": packet }),
            ),
            HandoffCommands::List { id } => ("handoff list".to_string(), json!({ "id": id })),
        },

        Commands::Activation { command } => match command {
            ActivationCommands::Record {
                id,
                phase,
                specialist,
                status,
                verdict,
                summary,
            } => (
                "activation record".to_string(),
                json!({
                    "id": id,
                    "phase": phase,
                    "specialist": specialist,
                    "status": status,
                    "verdict": verdict,
                    "summary": summary,
                }),
            ),
            ActivationCommands::List { id, phase } => (
                "activation list".to_string(),
                json!({ "id": id, "phase": phase }),
            ),
        },

        Commands::Requirements { command } => match command {
            RequirementsCommands::Show { phase, directive } => (
                "requirements show".to_string(),
                json!({ "phase": phase, "directive": directive }),
            ),
            RequirementsCommands::Check { id, phase } => (
                "requirements check".to_string(),
                json!({ "id": id, "phase": phase }),
            ),
        },

        Commands::Contract { command } => match command {
            ContractCommands::Attach { id, file } => (
                "contract attach".to_string(),
                json!({ "id": id, "file": file }),
            ),
            ContractCommands::Resolve { id } => {
                ("contract resolve".to_string(), json!({ "id": id }))
            }
            ContractCommands::ValidateData { id, op, entity } => (
                "contract validate-data".to_string(),
                json!({ "id": id, "op": op, "entity": entity }),
            ),
            ContractCommands::ValidateUx {
                id,
                path,
                lines,
                a11y_level,
            } => (
                "contract validate-ux".to_string(),
                json!({ "id": id, "path": path, "lines": lines, "a11y_level": a11y_level }),
            ),
        },

        Commands::Violation { command } => match command {
            ViolationCommands::Add {
                check,
                rule,
                severity,
                unit,
                message,
            } => (
                "violation add".to_string(),
                json!({
                    "check": check,
                    "rule": rule,
                    "severity": severity,
                    "unit": unit,
                    "message": message,
                }),
            ),
            ViolationCommands::List { check, status } => (
                "violation list".to_string(),
                json!({ "check": check, "status": status }),
            ),
        },

        Commands::Remediate { command } => match command {
            RemediateCommands::Groups { check } => {
                ("remediate groups".to_string(), json!({ "check": check }))
            }
            RemediateCommands::Run { check } => {
                ("remediate run".to_string(), json!({ "check": check }))
            }
        },

        Commands::Config { command } => match command {
            ConfigCommands::Show => ("config show".to_string(), json!({})),
            ConfigCommands::Set { name, value } => (
                "config set".to_string(),
                json!({ "name": name, "value": value }),
            ),
        },

        Commands::System { command } => match command {
            SystemCommands::Init => ("system init".to_string(), json!({})),
            SystemCommands::Info => ("system info".to_string(), json!({})),
            SystemCommands::RebuildCache => ("system rebuild-cache".to_string(), json!({})),
        },

        Commands::Log { limit } => ("log".to_string(), json!({ "limit": limit })),
    }
}
