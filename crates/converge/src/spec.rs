//! Resource declarations.
//!
//! A [`ResourceSpec`] is a desired-state declaration supplied by the caller.
//! Specs deserialize from TOML or JSON tables tagged by `type`:
//!
//! ```toml
//! [[resources]]
//! id = "git"
//! type = "package"
//! name = "git"
//! critical = true
//!
//! [[resources]]
//! id = "settings"
//! type = "file"
//! path = "/srv/app/settings.py"
//! content = "DEBUG = False\n"
//! mode = 0o644
//! ```

use crate::error::{Error, Result};
use crate::rules::{Predicate, RuleTable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// A desired-state declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Unique, stable identifier within a run
    pub id: String,
    /// Halt the run if this resource fails to converge
    #[serde(default)]
    pub critical: bool,
    /// Time budget for converging this resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(flatten)]
    pub kind: ResourceKind,
}

/// Kind-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceKind {
    Package(PackageSpec),
    File(FileSpec),
    Repository(RepositorySpec),
    Service(ServiceSpec),
    Command(CommandSpec),
}

impl ResourceKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Package(_) => "package",
            Self::File(_) => "file",
            Self::Repository(_) => "repository",
            Self::Service(_) => "service",
            Self::Command(_) => "command",
        }
    }
}

/// Package name, either fixed or selected from facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageName {
    Fixed(String),
    Select(RuleTable),
}

/// Extra package manager options applied when a predicate holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionOverride {
    pub when: Predicate,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: PackageName,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<OptionOverride>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    pub path: PathBuf,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
    /// Substitute `{{ fact }}` placeholders at plan time
    #[serde(default)]
    pub template: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySpec {
    pub url: String,
    pub path: PathBuf,
    /// Branch, tag or commit; `HEAD` follows the remote default branch
    #[serde(default = "default_reference")]
    pub reference: String,
}

fn default_reference() -> String {
    "HEAD".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Start at boot
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Ids of earlier resources whose change in the same run restarts the service
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restart_on: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// A guarded command.
///
/// At least one guard is required so that re-runs converge:
/// - `creates`: converged while this path exists
/// - `unless`: converged while this check command succeeds
/// - `watch`: converged while the watched files hash to the digest
///   recorded after the last successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creates: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch: Vec<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            cwd: None,
            environment: BTreeMap::new(),
            creates: None,
            unless: None,
            watch: Vec::new(),
        }
    }

    pub fn has_guard(&self) -> bool {
        self.creates.is_some() || self.unless.is_some() || !self.watch.is_empty()
    }
}

impl ResourceSpec {
    pub fn new(id: &str, kind: ResourceKind) -> Self {
        Self {
            id: id.to_string(),
            critical: false,
            timeout_secs: None,
            kind,
        }
    }

    pub fn package(id: &str, name: &str) -> Self {
        Self::new(
            id,
            ResourceKind::Package(PackageSpec {
                name: PackageName::Fixed(name.to_string()),
                options: Vec::new(),
                overrides: Vec::new(),
            }),
        )
    }

    pub fn package_select(id: &str, table: RuleTable) -> Self {
        Self::new(
            id,
            ResourceKind::Package(PackageSpec {
                name: PackageName::Select(table),
                options: Vec::new(),
                overrides: Vec::new(),
            }),
        )
    }

    pub fn file(id: &str, path: impl Into<PathBuf>, content: &str) -> Self {
        Self::new(
            id,
            ResourceKind::File(FileSpec {
                path: path.into(),
                content: content.to_string(),
                mode: None,
                template: false,
            }),
        )
    }

    pub fn repository(id: &str, url: &str, path: impl Into<PathBuf>) -> Self {
        Self::new(
            id,
            ResourceKind::Repository(RepositorySpec {
                url: url.to_string(),
                path: path.into(),
                reference: default_reference(),
            }),
        )
    }

    pub fn service(id: &str, service: ServiceSpec) -> Self {
        Self::new(id, ResourceKind::Service(service))
    }

    pub fn command(id: &str, command: CommandSpec) -> Self {
        Self::new(id, ResourceKind::Command(command))
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Set the branch, tag or commit of a repository resource.
    pub fn with_reference(mut self, reference: &str) -> Self {
        if let ResourceKind::Repository(repository) = &mut self.kind {
            repository.reference = reference.to_string();
        }
        self
    }

    /// Add a conditional option override to a package resource.
    pub fn with_override(mut self, when: Predicate, options: &[&str]) -> Self {
        if let ResourceKind::Package(package) = &mut self.kind {
            package.overrides.push(OptionOverride {
                when,
                options: options.iter().map(|s| (*s).to_string()).collect(),
            });
        }
        self
    }

    /// Check the declaration is well-formed.
    pub fn validate(&self) -> Result<()> {
        let id = self.id.as_str();
        if id.trim().is_empty() {
            return Err(Error::invalid(id, "resource id must not be empty"));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(Error::invalid(id, "resource id must not contain whitespace"));
        }
        if self.timeout_secs == Some(0) {
            return Err(Error::invalid(id, "timeout_secs must be greater than zero"));
        }

        match &self.kind {
            ResourceKind::Package(package) => match &package.name {
                PackageName::Fixed(name) if name.trim().is_empty() => {
                    Err(Error::invalid(id, "package name must not be empty"))
                }
                PackageName::Select(table) if table.is_empty() => {
                    Err(Error::invalid(id, "package selection has no rules"))
                }
                _ => Ok(()),
            },
            ResourceKind::File(file) => {
                if !file.path.is_absolute() {
                    return Err(Error::invalid(id, "file path must be absolute"));
                }
                if file.mode.is_some_and(|m| m > 0o7777) {
                    return Err(Error::invalid(id, "file mode must be at most 0o7777"));
                }
                Ok(())
            }
            ResourceKind::Repository(repo) => {
                if repo.url.trim().is_empty() {
                    return Err(Error::invalid(id, "repository url must not be empty"));
                }
                if !repo.path.is_absolute() {
                    return Err(Error::invalid(id, "repository path must be absolute"));
                }
                if repo.reference.trim().is_empty() {
                    return Err(Error::invalid(id, "repository reference must not be empty"));
                }
                Ok(())
            }
            ResourceKind::Service(service) => {
                if service.name.trim().is_empty() || service.name.contains('/') {
                    return Err(Error::invalid(id, "service name must be a plain unit name"));
                }
                if service.command.is_empty() {
                    return Err(Error::invalid(id, "service command must not be empty"));
                }
                Ok(())
            }
            ResourceKind::Command(command) => {
                if command.command.is_empty() {
                    return Err(Error::invalid(id, "command must not be empty"));
                }
                if !command.has_guard() {
                    return Err(Error::invalid(
                        id,
                        "command needs a creates, unless or watch guard",
                    ));
                }
                if command.unless.as_ref().is_some_and(Vec::is_empty) {
                    return Err(Error::invalid(id, "unless check must not be empty"));
                }
                Ok(())
            }
        }
    }
}

/// Validate every spec and the uniqueness of their ids.
///
/// A service may only restart on resources declared before it.
pub fn validate_all(specs: &[ResourceSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for spec in specs {
        spec.validate()?;
        if let ResourceKind::Service(service) = &spec.kind
            && let Some(unknown) = service
                .restart_on
                .iter()
                .find(|id| !seen.contains(id.as_str()))
        {
            return Err(Error::invalid(
                &spec.id,
                format!("restart_on names {unknown}, which is not declared before it"),
            ));
        }
        if !seen.insert(spec.id.as_str()) {
            return Err(Error::invalid(&spec.id, "duplicate resource id"));
        }
    }
    Ok(())
}

/// A recipe file: an ordered list of resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
}
