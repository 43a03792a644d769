//! Resource planner - expands resource specs into an ordered action plan
//!
//! Planning never queries the host. It validates the specs, resolves every
//! fact-dependent parameter and emits exactly one action per spec, in the
//! caller's declared order. Any error aborts planning as a whole, so a run
//! never starts from a partial plan.

use crate::error::{Error, Result};
use crate::facts::Facts;
use crate::spec::{self, PackageName, ResourceKind, ResourceSpec};
use crate::template;
use crate::types::{Action, ActionKind};
use std::collections::BTreeSet;
use std::time::Duration;

/// An ordered list of actions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    actions: Vec<Action>,
}

impl Plan {
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Mark the actions of the given spec ids critical.
    ///
    /// Every id must name a planned spec.
    pub fn mark_critical(&mut self, ids: &BTreeSet<String>) -> Result<()> {
        for id in ids {
            let action = self
                .actions
                .iter_mut()
                .find(|a| &a.spec_id == id)
                .ok_or_else(|| Error::invalid(id, "critical id does not name a resource"))?;
            action.critical = true;
        }
        Ok(())
    }

    /// Apply a timeout to every action that does not declare its own.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        if timeout.is_some() {
            for action in &mut self.actions {
                if action.timeout.is_none() {
                    action.timeout = timeout;
                }
            }
        }
        self
    }

    /// Keep only actions whose resource type or id matches `target`.
    ///
    /// Target format: "type" or "type.id"
    pub fn filter_by_target(self, target: Option<&str>) -> Self {
        match target {
            None => self,
            Some(t) => {
                let (resource_type, id) = parse_target(t);
                Self {
                    actions: self
                        .actions
                        .into_iter()
                        .filter(|a| matches_filter(a, resource_type, id))
                        .enumerate()
                        .map(|(index, action)| Action { index, ..action })
                        .collect(),
                }
            }
        }
    }
}

impl IntoIterator for Plan {
    type Item = Action;
    type IntoIter = std::vec::IntoIter<Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.into_iter()
    }
}

/// Build the plan for `specs` against `facts`.
pub fn plan(specs: &[ResourceSpec], facts: &Facts) -> Result<Plan> {
    spec::validate_all(specs)?;

    let actions = specs
        .iter()
        .enumerate()
        .map(|(index, spec)| plan_one(index, spec, facts))
        .collect::<Result<Vec<_>>>()?;

    log::debug!("Planned {} actions", actions.len());
    Ok(Plan { actions })
}

fn plan_one(index: usize, spec: &ResourceSpec, facts: &Facts) -> Result<Action> {
    let kind = match &spec.kind {
        ResourceKind::Package(package) => {
            let name = match &package.name {
                PackageName::Fixed(name) => name.clone(),
                PackageName::Select(table) => table
                    .select(facts)
                    .map_err(|e| Error::unsupported(&spec.id, e))?
                    .to_string(),
            };

            let mut options = package.options.clone();
            for over in &package.overrides {
                if over
                    .when
                    .evaluate(facts)
                    .map_err(|e| Error::unsupported(&spec.id, e))?
                {
                    options.extend(over.options.iter().cloned());
                }
            }

            ActionKind::InstallPackage { name, options }
        }
        ResourceKind::File(file) => {
            let content = if file.template {
                template::render(&file.content, facts)
                    .map_err(|e| Error::unsupported(&spec.id, e))?
            } else {
                file.content.clone()
            };

            ActionKind::WriteFile {
                path: file.path.clone(),
                content,
                mode: file.mode,
            }
        }
        ResourceKind::Repository(repo) => ActionKind::SyncRepository {
            url: repo.url.clone(),
            path: repo.path.clone(),
            reference: repo.reference.clone(),
        },
        ResourceKind::Service(service) => ActionKind::EnsureService(service.clone()),
        ResourceKind::Command(command) => ActionKind::RunCommand(command.clone()),
    };

    Ok(Action {
        index,
        spec_id: spec.id.clone(),
        critical: spec.critical,
        timeout: spec.timeout_secs.map(Duration::from_secs),
        kind,
    })
}

/// Parse a target string like "type.id" into (type, id)
fn parse_target(target: &str) -> (Option<&str>, Option<&str>) {
    match target.split_once('.') {
        None => (Some(target), None),
        Some((resource_type, id)) if !id.contains('.') => (Some(resource_type), Some(id)),
        Some(_) => (None, Some(target)),
    }
}

fn matches_filter(action: &Action, resource_type: Option<&str>, id: Option<&str>) -> bool {
    if let Some(rt) = resource_type {
        let matches_type = match rt {
            "packages" => action.resource_type() == "package",
            "files" => action.resource_type() == "file",
            "repositories" | "repos" => action.resource_type() == "repository",
            "services" => action.resource_type() == "service",
            "commands" => action.resource_type() == "command",
            _ => action.resource_type() == rt || action.spec_id == rt,
        };
        if !matches_type {
            return false;
        }
    }

    if let Some(id) = id
        && action.spec_id != id
    {
        return false;
    }

    true
}
