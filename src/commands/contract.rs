//! Contract commands.

use super::{json, open, read_input, Output};
use crate::governance::contracts::{
    self, AttachOutcome, DataOperation, DataValidation, ResolvedContract, UxChange, UxValidation,
};
use crate::models::ContractSpec;
use crate::storage::validate_directive_id;
use crate::{Error, Result};
use serde::Serialize;
use std::path::Path;

/// Result of `hm contract attach`.
///
/// A second attach of the same kind is not an error for the caller: the
/// existing contract comes back with `created: false`.
#[derive(Serialize)]
pub struct AttachResult {
    #[serde(flatten)]
    pub outcome: AttachOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl Output for AttachResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let c = &self.outcome.contract;
        if self.outcome.created {
            format!(
                "Attached {} contract {} to {} ({} descendant(s) updated)",
                c.kind(),
                c.id,
                c.directive_id,
                self.outcome.refreshed
            )
        } else {
            format!(
                "{} already has {} contract {}; left unchanged",
                c.directive_id,
                c.kind(),
                c.id
            )
        }
    }
}

pub fn contract_attach(repo_path: &Path, id: &str, file: &str) -> Result<AttachResult> {
    validate_directive_id(id)?;
    let spec: ContractSpec = serde_json::from_str(&read_input(file)?)
        .map_err(|e| Error::InvalidInput(format!("Invalid contract: {}", e)))?;
    let mut storage = open(repo_path)?;
    let outcome = contracts::attach_or_existing(&mut storage, id, spec)?;
    Ok(AttachResult {
        code: (!outcome.created).then_some("ContractAlreadyExists"),
        outcome,
    })
}

/// Result of `hm contract resolve`.
#[derive(Serialize)]
pub struct ResolveResult {
    pub directive_id: String,
    pub contracts: Vec<ResolvedContract>,
}

impl Output for ResolveResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.contracts.is_empty() {
            return format!("No contracts apply to {}.", self.directive_id);
        }
        self.contracts
            .iter()
            .map(|r| {
                format!(
                    "[{}] {} {} from {}",
                    r.depth,
                    r.contract.kind(),
                    r.contract.id,
                    r.owner_id
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn contract_resolve(repo_path: &Path, id: &str) -> Result<ResolveResult> {
    validate_directive_id(id)?;
    let storage = open(repo_path)?;
    Ok(ResolveResult {
        directive_id: id.to_string(),
        contracts: contracts::resolve(&storage, id)?,
    })
}

/// Result of `hm contract validate-data`.
#[derive(Serialize)]
pub struct DataValidationResult {
    #[serde(flatten)]
    pub validation: DataValidation,
}

impl Output for DataValidationResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let v = &self.validation;
        let mut lines = Vec::new();
        match (&v.contract_id, v.valid) {
            (None, _) => lines.push("valid (no data contract applies)".to_string()),
            (Some(id), true) => lines.push(format!("valid under {}", id)),
            (Some(id), false) => lines.push(format!("INVALID under {}", id)),
        }
        lines.extend(v.violations.iter().map(|p| format!("  {}: {}", p.rule, p.message)));
        lines.extend(
            v.advisories
                .iter()
                .map(|p| format!("  advisory ({}): {}", p.contract_id, p.message)),
        );
        lines.join("\n")
    }
}

/// Validate either a free-text operation or a list of entities.
pub fn contract_validate_data(
    repo_path: &Path,
    id: &str,
    op: Option<&str>,
    entities: &[String],
) -> Result<DataValidationResult> {
    validate_directive_id(id)?;
    let operation = match op {
        Some(text) => DataOperation::parse(text),
        None => DataOperation::from_entities(entities)?,
    };
    if operation.is_empty() && operation.verbs.is_empty() {
        return Err(Error::InvalidInput(
            "No tables, columns or statements recognised in the operation".to_string(),
        ));
    }
    let storage = open(repo_path)?;
    Ok(DataValidationResult {
        validation: contracts::validate_data(&storage, id, &operation)?,
    })
}

/// Result of `hm contract validate-ux`.
#[derive(Serialize)]
pub struct UxValidationResult {
    pub path: String,
    #[serde(flatten)]
    pub validation: UxValidation,
}

impl Output for UxValidationResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let v = &self.validation;
        let mut line = match (&v.reason, &v.contract_id) {
            (Some(reason), _) => format!("INVALID {}: {}", self.path, reason),
            (None, Some(id)) => format!("valid {} under {}", self.path, id),
            (None, None) => format!("valid {} (no UX contract applies)", self.path),
        };
        if let Some(style) = &v.style {
            line.push_str(&format!(" [style {}]", style));
        }
        line
    }
}

pub fn contract_validate_ux(
    repo_path: &Path,
    id: &str,
    path: &str,
    lines: Option<u32>,
    a11y_level: Option<u8>,
) -> Result<UxValidationResult> {
    validate_directive_id(id)?;
    let storage = open(repo_path)?;
    let change = UxChange {
        path: path.to_string(),
        lines,
        accessibility_level: a11y_level,
    };
    Ok(UxValidationResult {
        path: path.to_string(),
        validation: contracts::validate_ux(&storage, id, &change)?,
    })
}
