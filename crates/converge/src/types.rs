//! Core types for planned actions and their outcomes

use crate::error::ActionError;
use crate::spec::{CommandSpec, ServiceSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A concrete operation derived from exactly one resource spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    /// Position in the plan (0-based)
    pub index: usize,
    /// Id of the spec this action was derived from
    pub spec_id: String,
    /// Halt the run if this action fails
    pub critical: bool,
    /// Time budget for this action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    pub kind: ActionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionKind {
    InstallPackage {
        name: String,
        options: Vec<String>,
    },
    WriteFile {
        path: PathBuf,
        content: String,
        mode: Option<u32>,
    },
    SyncRepository {
        url: String,
        path: PathBuf,
        reference: String,
    },
    EnsureService(ServiceSpec),
    RunCommand(CommandSpec),
}

impl Action {
    /// Resource type category, matching the spec's `type`
    pub fn resource_type(&self) -> &'static str {
        match self.kind {
            ActionKind::InstallPackage { .. } => "package",
            ActionKind::WriteFile { .. } => "file",
            ActionKind::SyncRepository { .. } => "repository",
            ActionKind::EnsureService(_) => "service",
            ActionKind::RunCommand(_) => "command",
        }
    }

    /// Human-readable description
    pub fn description(&self) -> String {
        match &self.kind {
            ActionKind::InstallPackage { name, options } if options.is_empty() => {
                format!("install package {name}")
            }
            ActionKind::InstallPackage { name, options } => {
                format!("install package {name} ({})", options.join(" "))
            }
            ActionKind::WriteFile { path, .. } => format!("write file {}", path.display()),
            ActionKind::SyncRepository {
                url,
                path,
                reference,
            } => format!("sync {url}@{reference} into {}", path.display()),
            ActionKind::EnsureService(service) => format!("ensure service {} running", service.name),
            ActionKind::RunCommand(command) => format!("run {}", command.command.join(" ")),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.spec_id, self.description())
    }
}

/// Outcome status of one action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Changed,
    Unchanged,
    Failed,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
            Self::Failed => "failed",
        })
    }
}

/// Result of executing one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub spec_id: String,
    pub resource_type: String,
    pub description: String,
    pub critical: bool,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
    /// What was done (or would be done, in a dry run)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Line diff of a file change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    pub elapsed_ms: u64,
}

impl ActionResult {
    fn from_action(action: &Action, status: ActionStatus) -> Self {
        Self {
            spec_id: action.spec_id.clone(),
            resource_type: action.resource_type().to_string(),
            description: action.description(),
            critical: action.critical,
            status,
            error: None,
            message: None,
            diff: None,
            elapsed_ms: 0,
        }
    }

    pub fn changed(action: &Action, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::from_action(action, ActionStatus::Changed)
        }
    }

    pub fn unchanged(action: &Action) -> Self {
        Self::from_action(action, ActionStatus::Unchanged)
    }

    pub fn failed(action: &Action, error: ActionError) -> Self {
        Self {
            error: Some(error),
            ..Self::from_action(action, ActionStatus::Failed)
        }
    }

    pub fn with_diff(mut self, diff: Option<String>) -> Self {
        self.diff = diff;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn is_failure(&self) -> bool {
        self.status == ActionStatus::Failed
    }

    pub fn is_change(&self) -> bool {
        self.status == ActionStatus::Changed
    }
}

/// Options for execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Query state only; report what would change
    pub dry_run: bool,
}
