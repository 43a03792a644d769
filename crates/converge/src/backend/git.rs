//! Version-control backend (git CLI)

use super::process::{CommandLine, CommandRunner};
use crate::error::ActionError;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Interface to the version-control client.
pub trait VersionControl: Send + Sync {
    /// Whether `path` is a working copy.
    fn is_working_copy(&self, path: &Path) -> bool;

    /// Clone `url` into `path`.
    fn clone_repo(&self, url: &str, path: &Path, deadline: Option<Instant>) -> Result<(), ActionError>;

    /// Fetch from the origin remote.
    fn fetch(&self, path: &Path, deadline: Option<Instant>) -> Result<(), ActionError>;

    /// Commit currently checked out.
    fn head(&self, path: &Path, deadline: Option<Instant>) -> Result<String, ActionError>;

    /// Commit the reference points at, as last fetched.
    fn resolve(&self, path: &Path, reference: &str, deadline: Option<Instant>)
    -> Result<String, ActionError>;

    /// Check out a commit, discarding local modifications.
    fn checkout(&self, path: &Path, commit: &str, deadline: Option<Instant>) -> Result<(), ActionError>;
}

/// The `git` command line client.
pub struct Git {
    runner: Arc<dyn CommandRunner>,
}

impl Git {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn git(path: &Path) -> CommandLine {
        CommandLine::new("git")
            .current_dir(path)
            .env("GIT_TERMINAL_PROMPT", "0")
    }

    fn run(&self, cmd: &CommandLine, deadline: Option<Instant>) -> Result<String, ActionError> {
        let output = self.runner.run(cmd, deadline)?;
        if !output.success {
            return Err(ActionError::from_git_output(&output.diagnostic()));
        }
        Ok(output.stdout_str().trim().to_string())
    }
}

/// Candidate revisions for a reference, most specific first.
fn candidates(reference: &str) -> Vec<String> {
    if reference == "HEAD" {
        return vec!["refs/remotes/origin/HEAD".to_string()];
    }
    vec![
        format!("refs/remotes/origin/{reference}"),
        format!("refs/tags/{reference}"),
        reference.to_string(),
    ]
}

impl VersionControl for Git {
    fn is_working_copy(&self, path: &Path) -> bool {
        path.join(".git").exists()
    }

    fn clone_repo(&self, url: &str, path: &Path, deadline: Option<Instant>) -> Result<(), ActionError> {
        // git creates missing leading directories of the target itself
        let cmd = CommandLine::new("git")
            .env("GIT_TERMINAL_PROMPT", "0")
            .args(["clone", "--quiet", url])
            .arg(path.to_string_lossy());
        self.run(&cmd, deadline).map(|_| ())
    }

    fn fetch(&self, path: &Path, deadline: Option<Instant>) -> Result<(), ActionError> {
        let cmd = Self::git(path).args(["fetch", "--quiet", "--tags", "--prune", "origin"]);
        self.run(&cmd, deadline)?;
        // Keep origin/HEAD in step with the remote default branch
        let set_head = Self::git(path).args(["remote", "set-head", "origin", "--auto"]);
        if let Err(e) = self.run(&set_head, deadline) {
            log::debug!("Could not refresh origin/HEAD in {}: {}", path.display(), e);
        }
        Ok(())
    }

    fn head(&self, path: &Path, deadline: Option<Instant>) -> Result<String, ActionError> {
        self.run(&Self::git(path).args(["rev-parse", "HEAD"]), deadline)
    }

    fn resolve(
        &self,
        path: &Path,
        reference: &str,
        deadline: Option<Instant>,
    ) -> Result<String, ActionError> {
        for candidate in candidates(reference) {
            let cmd = Self::git(path).args([
                "rev-parse".to_string(),
                "--verify".to_string(),
                "--quiet".to_string(),
                format!("{candidate}^{{commit}}"),
            ]);
            let output = self.runner.run(&cmd, deadline)?;
            if output.success {
                return Ok(output.stdout_str().trim().to_string());
            }
        }
        Err(ActionError::new(
            crate::error::ErrorCategory::NotFound,
            format!("reference '{reference}' not found in {}", path.display()),
        ))
    }

    fn checkout(&self, path: &Path, commit: &str, deadline: Option<Instant>) -> Result<(), ActionError> {
        let cmd = Self::git(path).args([
            "-c",
            "advice.detachedHead=false",
            "checkout",
            "--quiet",
            "--force",
            "--detach",
            commit,
        ]);
        self.run(&cmd, deadline).map(|_| ())
    }
}
