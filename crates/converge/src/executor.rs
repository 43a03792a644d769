//! Execution engine - applies planned actions to the host
//!
//! Every kind follows the same contract: query the current state first and
//! mutate only when it differs from the desired state. Actions run one at a
//! time in plan order; a failed critical action stops the run. A service
//! restarts when a resource it lists in `restart_on` changed earlier in the
//! same run.

use crate::backend::{CommandLine, Host};
use crate::context::ProgressCallback;
use crate::error::{ActionError, ErrorCategory};
use crate::planner::Plan;
use crate::spec::{CommandSpec, ServiceSpec};
use crate::stamp;
use crate::types::{Action, ActionKind, ActionResult, ActionStatus, ExecuteOptions};
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Instant;

/// What applying an action did.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Unchanged,
    Changed {
        message: String,
        diff: Option<String>,
    },
}

impl Outcome {
    fn changed(message: impl Into<String>) -> Self {
        Self::Changed {
            message: message.into(),
            diff: None,
        }
    }
}

/// Execute a single action.
///
/// Never returns an error: failures are recorded in the result.
pub fn execute(action: &Action, host: &Host, opts: &ExecuteOptions) -> ActionResult {
    execute_notified(action, host, opts, false)
}

/// Execute a single action; `notified` restarts a running service even when
/// its definition is current.
fn execute_notified(
    action: &Action,
    host: &Host,
    opts: &ExecuteOptions,
    notified: bool,
) -> ActionResult {
    let started = Instant::now();
    let deadline = action.timeout.map(|t| started + t);
    let dry_run = opts.dry_run;

    let outcome = match &action.kind {
        ActionKind::InstallPackage { name, options } => {
            converge_package(host, name, options, dry_run, deadline)
        }
        ActionKind::WriteFile {
            path,
            content,
            mode,
        } => converge_file(path, content, *mode, dry_run),
        ActionKind::SyncRepository {
            url,
            path,
            reference,
        } => converge_repository(host, url, path, reference, dry_run, deadline),
        ActionKind::EnsureService(service) => {
            converge_service(host, service, notified, dry_run, deadline)
        }
        ActionKind::RunCommand(command) => {
            converge_command(host, &action.spec_id, command, dry_run, deadline)
        }
    };

    let result = match outcome {
        Ok(Outcome::Unchanged) => {
            log::debug!("{action}: unchanged");
            ActionResult::unchanged(action)
        }
        Ok(Outcome::Changed { message, diff }) => {
            log::info!("{action}: {message}");
            ActionResult::changed(action, message).with_diff(diff)
        }
        Err(e) => {
            log::warn!("{action}: {e}");
            ActionResult::failed(action, e)
        }
    };
    result.with_elapsed(started.elapsed())
}

/// Execute a plan in order, halting after a failed critical action.
///
/// Returns one result per executed action; actions after a halt are absent.
pub fn execute_plan<P: ProgressCallback + ?Sized>(
    plan: &Plan,
    host: &Host,
    opts: &ExecuteOptions,
    progress: &mut P,
) -> Vec<ActionResult> {
    progress.on_plan_start(plan.len());

    let mut results: Vec<ActionResult> = Vec::with_capacity(plan.len());
    for action in plan.actions() {
        progress.on_action_start(action);
        let notified = match &action.kind {
            ActionKind::EnsureService(service) => service.restart_on.iter().any(|id| {
                results
                    .iter()
                    .any(|r| r.spec_id == *id && r.status == ActionStatus::Changed)
            }),
            _ => false,
        };
        let result = execute_notified(action, host, opts, notified);
        progress.on_action_complete(action, &result);

        let halt = action.critical && result.is_failure();
        results.push(result);
        if halt {
            log::error!(
                "Critical action {} failed; {} remaining actions not run",
                action.spec_id,
                plan.len() - results.len()
            );
            break;
        }
    }

    progress.on_plan_complete();
    results
}

fn converge_package(
    host: &Host,
    name: &str,
    options: &[String],
    dry_run: bool,
    deadline: Option<Instant>,
) -> Result<Outcome, ActionError> {
    if host.packages.is_installed(name, deadline)? {
        return Ok(Outcome::Unchanged);
    }
    if dry_run {
        return Ok(Outcome::changed(format!(
            "would install {name} with {}",
            host.packages.name()
        )));
    }
    host.packages.install(name, options, deadline)?;
    Ok(Outcome::changed(format!("installed {name}")))
}

fn converge_file(
    path: &Path,
    content: &str,
    mode: Option<u32>,
    dry_run: bool,
) -> Result<Outcome, ActionError> {
    let current = match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(ActionError::io(format!("reading {}", path.display()), &e)),
    };

    let content_matches = current.as_deref() == Some(content.as_bytes());
    let mode_matches = match (mode, &current) {
        (Some(wanted), Some(_)) => file_mode(path)? == Some(wanted),
        _ => true,
    };
    if content_matches && mode_matches {
        return Ok(Outcome::Unchanged);
    }

    let old = current
        .as_deref()
        .map(String::from_utf8_lossy)
        .unwrap_or_default();
    let diff = (!content_matches).then(|| unified_diff(&old, content, path));
    let verb = match (&current, content_matches) {
        (None, _) => "create",
        (Some(_), true) => "set mode on",
        (Some(_), false) => "update",
    };

    if dry_run {
        let stats = diff_stats(&old, content);
        return Ok(Outcome::Changed {
            message: format!("would {verb} {} {stats}", path.display()).trim_end().to_string(),
            diff,
        });
    }

    if content_matches {
        if let Some(wanted) = mode {
            set_mode(path, wanted)?;
        }
    } else {
        write_atomic(path, content, mode)?;
    }

    let past = match verb {
        "create" => "created",
        "update" => "updated",
        _ => "set mode on",
    };
    Ok(Outcome::Changed {
        message: format!("{past} {}", path.display()),
        diff,
    })
}

/// "(+added -removed)" line counts, empty when nothing differs.
fn diff_stats(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let (mut added, mut removed) = (0, 0);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    if added == 0 && removed == 0 {
        String::new()
    } else {
        format!("(+{added} -{removed})")
    }
}

fn unified_diff(old: &str, new: &str, path: &Path) -> String {
    let name = path.display().to_string();
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&name, &name)
        .to_string()
}

/// Write through a sibling temp file and rename into place.
fn write_atomic(path: &Path, content: &str, mode: Option<u32>) -> Result<(), ActionError> {
    let parent = path
        .parent()
        .ok_or_else(|| ActionError::new(ErrorCategory::Filesystem, "file path has no parent"))?;
    fs::create_dir_all(parent)
        .map_err(|e| ActionError::io(format!("creating {}", parent.display()), &e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.provision-tmp"));

    let written = fs::write(&tmp, content)
        .map_err(|e| ActionError::io(format!("writing {}", tmp.display()), &e))
        .and_then(|()| match mode {
            Some(mode) => set_mode(&tmp, mode),
            None => Ok(()),
        })
        .and_then(|()| {
            fs::rename(&tmp, path)
                .map_err(|e| ActionError::io(format!("replacing {}", path.display()), &e))
        });
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

#[cfg(unix)]
fn file_mode(path: &Path) -> Result<Option<u32>, ActionError> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = fs::metadata(path)
        .map_err(|e| ActionError::io(format!("reading {}", path.display()), &e))?;
    Ok(Some(metadata.permissions().mode() & 0o7777))
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> Result<Option<u32>, ActionError> {
    Ok(None)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), ActionError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| ActionError::io(format!("setting mode on {}", path.display()), &e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), ActionError> {
    Ok(())
}

fn converge_repository(
    host: &Host,
    url: &str,
    path: &Path,
    reference: &str,
    dry_run: bool,
    deadline: Option<Instant>,
) -> Result<Outcome, ActionError> {
    let vcs = host.vcs.as_ref();

    if vcs.is_working_copy(path) {
        // A dry run compares against the refs from the last fetch
        if !dry_run {
            vcs.fetch(path, deadline)?;
        }
        let target = vcs.resolve(path, reference, deadline)?;
        let head = vcs.head(path, deadline)?;
        if head == target {
            return Ok(Outcome::Unchanged);
        }
        if dry_run {
            return Ok(Outcome::changed(format!(
                "would check out {reference} ({} -> {})",
                short(&head),
                short(&target)
            )));
        }
        vcs.checkout(path, &target, deadline)?;
        return Ok(Outcome::changed(format!(
            "checked out {reference} ({} -> {})",
            short(&head),
            short(&target)
        )));
    }

    if occupied(path)? {
        return Err(ActionError::new(
            ErrorCategory::Filesystem,
            format!("{} exists but is not a working copy", path.display()),
        ));
    }

    if dry_run {
        return Ok(Outcome::changed(format!("would clone {url} into {}", path.display())));
    }

    vcs.clone_repo(url, path, deadline)?;
    let target = vcs.resolve(path, reference, deadline)?;
    if vcs.head(path, deadline)? != target {
        vcs.checkout(path, &target, deadline)?;
    }
    Ok(Outcome::changed(format!(
        "cloned {url} at {}",
        short(&target)
    )))
}

/// Whether a path exists as anything other than an empty directory.
fn occupied(path: &Path) -> Result<bool, ActionError> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(_) => Ok(path.exists()),
    }
}

fn short(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}

fn converge_service(
    host: &Host,
    service: &ServiceSpec,
    notified: bool,
    dry_run: bool,
    deadline: Option<Instant>,
) -> Result<Outcome, ActionError> {
    let services = host.services.as_ref();
    let name = service.name.as_str();

    let desired = services.definition(service);
    let definition_changed =
        services.installed_definition(name)?.as_deref() != Some(desired.as_str());
    let needs_enable = service.enabled && !services.is_enabled(name, deadline)?;
    let active = services.is_active(name, deadline)?;

    let needs_restart = active && (definition_changed || notified);

    if !definition_changed && !needs_enable && active && !notified {
        return Ok(Outcome::Unchanged);
    }

    let mut steps = Vec::new();
    if definition_changed {
        steps.push("update definition");
    }
    if needs_enable {
        steps.push("enable");
    }
    if !active {
        steps.push("start");
    } else if needs_restart {
        steps.push("restart");
    }

    if dry_run {
        return Ok(Outcome::changed(format!("would {} {name}", steps.join(", "))));
    }

    if definition_changed {
        services.install_definition(name, &desired, deadline)?;
    }
    if needs_enable {
        services.enable(name, deadline)?;
    }
    if !active {
        services.start(name, deadline)?;
    } else if needs_restart {
        services.restart(name, deadline)?;
    }

    Ok(Outcome::changed(format!("{} {name}", past_tense(&steps).join(", "))))
}

fn past_tense(steps: &[&str]) -> Vec<&'static str> {
    steps
        .iter()
        .map(|step| match *step {
            "update definition" => "updated",
            "enable" => "enabled",
            "start" => "started",
            _ => "restarted",
        })
        .collect()
}

fn converge_command(
    host: &Host,
    id: &str,
    command: &CommandSpec,
    dry_run: bool,
    deadline: Option<Instant>,
) -> Result<Outcome, ActionError> {
    if let Some(creates) = &command.creates {
        if creates.exists() {
            log::debug!("{id}: {} exists", creates.display());
            return Ok(Outcome::Unchanged);
        }
    }

    if let Some(check) = &command.unless {
        let check = command_line(check, command)?;
        if host.runner.run_status(&check, deadline)? {
            log::debug!("{id}: `{check}` succeeded");
            return Ok(Outcome::Unchanged);
        }
    }

    let digest = if command.watch.is_empty() {
        None
    } else {
        let digest = stamp::digest(&command.watch)
            .map_err(|e| ActionError::io("hashing watched files", &e))?;
        if host.stamps.matches(id, &digest) {
            log::debug!("{id}: watched files unchanged");
            return Ok(Outcome::Unchanged);
        }
        Some(digest)
    };

    let cmd = command_line(&command.command, command)?;
    if dry_run {
        return Ok(Outcome::changed(format!("would run `{cmd}`")));
    }

    let output = host.runner.run(&cmd, deadline)?;
    if !output.success {
        return Err(ActionError::new(
            ErrorCategory::Command,
            format!("`{cmd}` failed: {}", output.diagnostic()),
        ));
    }

    if let Some(digest) = digest {
        if let Err(e) = host.stamps.write(id, &digest) {
            log::warn!("{id}: could not record stamp in {}: {e}", host.stamps.dir().display());
        }
    }

    Ok(Outcome::changed(format!("ran `{cmd}`")))
}

fn command_line(argv: &[String], command: &CommandSpec) -> Result<CommandLine, ActionError> {
    let mut cmd = CommandLine::from_argv(argv)
        .ok_or_else(|| ActionError::new(ErrorCategory::Command, "empty command"))?
        .envs(&command.environment);
    if let Some(cwd) = &command.cwd {
        cmd = cmd.current_dir(cwd);
    }
    Ok(cmd)
}
