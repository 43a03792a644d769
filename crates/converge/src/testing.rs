//! In-memory host collaborators for tests

use crate::backend::{
    CommandLine, CommandOutput, CommandRunner, Host, PackageManager, ServiceManager,
    SystemRunner, VersionControl,
};
use crate::error::{ActionError, ErrorCategory};
use crate::spec::ServiceSpec;
use crate::stamp::StampStore;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Answers commands by prefix and records every invocation.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: Vec<(String, CommandOutput)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond with `output` to commands starting with `prefix`.
    /// The first matching prefix wins; unmatched commands succeed silently.
    pub fn respond(mut self, prefix: &str, output: CommandOutput) -> Self {
        self.responses.push((prefix.to_string(), output));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, cmd: &CommandLine, _deadline: Option<Instant>) -> Result<CommandOutput, ActionError> {
        let line = cmd.to_string();
        lock(&self.calls).push(line.clone());
        Ok(self
            .responses
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map_or_else(|| CommandOutput::ok(""), |(_, output)| output.clone()))
    }
}

#[derive(Default)]
struct PackageState {
    installed: BTreeSet<String>,
    broken: BTreeMap<String, ActionError>,
    installs: Vec<(String, Vec<String>)>,
}

/// Package manager with an in-memory package database.
#[derive(Clone, Default)]
pub struct FakePackages {
    state: Arc<Mutex<PackageState>>,
}

impl FakePackages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_installed(self, name: &str) -> Self {
        lock(&self.state).installed.insert(name.to_string());
        self
    }

    /// Make installing `name` fail with `error`.
    pub fn failing(self, name: &str, error: ActionError) -> Self {
        lock(&self.state).broken.insert(name.to_string(), error);
        self
    }

    pub fn installs(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.state).installs.clone()
    }
}

impl PackageManager for FakePackages {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn is_installed(&self, package: &str, _deadline: Option<Instant>) -> Result<bool, ActionError> {
        Ok(lock(&self.state).installed.contains(package))
    }

    fn install(
        &self,
        package: &str,
        options: &[String],
        _deadline: Option<Instant>,
    ) -> Result<(), ActionError> {
        let mut state = lock(&self.state);
        state.installs.push((package.to_string(), options.to_vec()));
        if let Some(error) = state.broken.get(package) {
            return Err(error.clone());
        }
        state.installed.insert(package.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct VcsState {
    /// url -> (reference -> commit)
    remotes: BTreeMap<String, BTreeMap<String, String>>,
    /// path -> (url, checked out commit)
    working_copies: BTreeMap<PathBuf, (String, String)>,
    unreachable: bool,
    clones: usize,
    checkouts: usize,
}

/// Version control with in-memory remotes. Clones create the directory.
#[derive(Clone, Default)]
pub struct FakeVcs {
    state: Arc<Mutex<VcsState>>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `reference` of the remote at `url` to `commit`.
    pub fn with_remote_ref(self, url: &str, reference: &str, commit: &str) -> Self {
        lock(&self.state)
            .remotes
            .entry(url.to_string())
            .or_default()
            .insert(reference.to_string(), commit.to_string());
        self
    }

    pub fn push(&self, url: &str, reference: &str, commit: &str) {
        lock(&self.state)
            .remotes
            .entry(url.to_string())
            .or_default()
            .insert(reference.to_string(), commit.to_string());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        lock(&self.state).unreachable = unreachable;
    }

    pub fn clones(&self) -> usize {
        lock(&self.state).clones
    }

    pub fn checkouts(&self) -> usize {
        lock(&self.state).checkouts
    }

    fn network(state: &VcsState) -> Result<(), ActionError> {
        if state.unreachable {
            return Err(ActionError::new(ErrorCategory::Network, "could not resolve host"));
        }
        Ok(())
    }
}

impl VersionControl for FakeVcs {
    fn is_working_copy(&self, path: &Path) -> bool {
        lock(&self.state).working_copies.contains_key(path)
    }

    fn clone_repo(&self, url: &str, path: &Path, _deadline: Option<Instant>) -> Result<(), ActionError> {
        let mut state = lock(&self.state);
        Self::network(&state)?;
        let head = state
            .remotes
            .get(url)
            .and_then(|refs| refs.get("HEAD"))
            .cloned()
            .ok_or_else(|| ActionError::new(ErrorCategory::NotFound, "repository not found"))?;
        fs::create_dir_all(path).map_err(|e| ActionError::io("clone", &e))?;
        state
            .working_copies
            .insert(path.to_path_buf(), (url.to_string(), head));
        state.clones += 1;
        Ok(())
    }

    fn fetch(&self, _path: &Path, _deadline: Option<Instant>) -> Result<(), ActionError> {
        Self::network(&lock(&self.state))
    }

    fn head(&self, path: &Path, _deadline: Option<Instant>) -> Result<String, ActionError> {
        lock(&self.state)
            .working_copies
            .get(path)
            .map(|(_, head)| head.clone())
            .ok_or_else(|| ActionError::new(ErrorCategory::NotFound, "not a working copy"))
    }

    fn resolve(
        &self,
        path: &Path,
        reference: &str,
        _deadline: Option<Instant>,
    ) -> Result<String, ActionError> {
        let state = lock(&self.state);
        let url = state
            .working_copies
            .get(path)
            .map(|(url, _)| url.clone())
            .ok_or_else(|| ActionError::new(ErrorCategory::NotFound, "not a working copy"))?;
        state
            .remotes
            .get(&url)
            .and_then(|refs| refs.get(reference))
            .cloned()
            .ok_or_else(|| {
                ActionError::new(ErrorCategory::NotFound, format!("reference '{reference}' not found"))
            })
    }

    fn checkout(&self, path: &Path, commit: &str, _deadline: Option<Instant>) -> Result<(), ActionError> {
        let mut state = lock(&self.state);
        let entry = state
            .working_copies
            .get_mut(path)
            .ok_or_else(|| ActionError::new(ErrorCategory::NotFound, "not a working copy"))?;
        entry.1 = commit.to_string();
        state.checkouts += 1;
        Ok(())
    }
}

#[derive(Default)]
struct ServiceState {
    units: BTreeMap<String, String>,
    active: BTreeSet<String>,
    enabled: BTreeSet<String>,
    refuse_start: bool,
    restarts: usize,
}

/// Service manager holding unit definitions in memory.
#[derive(Clone, Default)]
pub struct FakeServices {
    state: Arc<Mutex<ServiceState>>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing_start(self) -> Self {
        lock(&self.state).refuse_start = true;
        self
    }

    pub fn is_running(&self, name: &str) -> bool {
        lock(&self.state).active.contains(name)
    }

    pub fn stop(&self, name: &str) {
        lock(&self.state).active.remove(name);
    }

    pub fn restarts(&self) -> usize {
        lock(&self.state).restarts
    }
}

impl ServiceManager for FakeServices {
    fn definition(&self, service: &ServiceSpec) -> String {
        format!(
            "{}|{}|{:?}|{:?}",
            service.name,
            service.command.join(" "),
            service.working_dir,
            service.environment
        )
    }

    fn installed_definition(&self, name: &str) -> Result<Option<String>, ActionError> {
        Ok(lock(&self.state).units.get(name).cloned())
    }

    fn install_definition(
        &self,
        name: &str,
        definition: &str,
        _deadline: Option<Instant>,
    ) -> Result<(), ActionError> {
        lock(&self.state)
            .units
            .insert(name.to_string(), definition.to_string());
        Ok(())
    }

    fn is_active(&self, name: &str, _deadline: Option<Instant>) -> Result<bool, ActionError> {
        Ok(lock(&self.state).active.contains(name))
    }

    fn is_enabled(&self, name: &str, _deadline: Option<Instant>) -> Result<bool, ActionError> {
        Ok(lock(&self.state).enabled.contains(name))
    }

    fn enable(&self, name: &str, _deadline: Option<Instant>) -> Result<(), ActionError> {
        lock(&self.state).enabled.insert(name.to_string());
        Ok(())
    }

    fn start(&self, name: &str, _deadline: Option<Instant>) -> Result<(), ActionError> {
        let mut state = lock(&self.state);
        if state.refuse_start {
            return Err(ActionError::new(ErrorCategory::Service, "Job failed"));
        }
        state.active.insert(name.to_string());
        Ok(())
    }

    fn restart(&self, name: &str, deadline: Option<Instant>) -> Result<(), ActionError> {
        self.start(name, deadline)?;
        lock(&self.state).restarts += 1;
        Ok(())
    }
}

/// Handles to the fakes behind a test host.
pub struct FakeHost {
    pub packages: FakePackages,
    pub vcs: FakeVcs,
    pub services: FakeServices,
    pub state_dir: PathBuf,
}

impl FakeHost {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            packages: FakePackages::new(),
            vcs: FakeVcs::new(),
            services: FakeServices::new(),
            state_dir: state_dir.to_path_buf(),
        }
    }

    /// A host wired to these fakes; commands run for real.
    pub fn host(&self) -> Host {
        Host {
            packages: Box::new(self.packages.clone()),
            vcs: Box::new(self.vcs.clone()),
            services: Box::new(self.services.clone()),
            runner: Arc::new(SystemRunner),
            stamps: StampStore::new(self.state_dir.join("stamps")),
        }
    }
}
