//! Package manager backends (apt, yum, dnf)

use super::process::{CommandLine, CommandRunner};
use crate::error::ActionError;
use std::sync::Arc;
use std::time::Instant;

/// Interface to the host's package manager.
pub trait PackageManager: Send + Sync {
    /// Name of the underlying tool, for logs.
    fn name(&self) -> &'static str;

    /// Check whether the package is installed.
    fn is_installed(&self, package: &str, deadline: Option<Instant>) -> Result<bool, ActionError>;

    /// Install the package non-interactively with extra `options`.
    fn install(
        &self,
        package: &str,
        options: &[String],
        deadline: Option<Instant>,
    ) -> Result<(), ActionError>;
}

/// Debian family: `dpkg-query` / `apt-get`.
pub struct Apt {
    runner: Arc<dyn CommandRunner>,
}

impl Apt {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl PackageManager for Apt {
    fn name(&self) -> &'static str {
        "apt-get"
    }

    fn is_installed(&self, package: &str, deadline: Option<Instant>) -> Result<bool, ActionError> {
        let query = CommandLine::new("dpkg-query").args(["-W", "-f=${Status}", package]);
        let output = self.runner.run(&query, deadline)?;
        Ok(output.success && output.stdout_str().contains("install ok installed"))
    }

    fn install(
        &self,
        package: &str,
        options: &[String],
        deadline: Option<Instant>,
    ) -> Result<(), ActionError> {
        let cmd = CommandLine::new("apt-get")
            .args(["-q", "-y"])
            .args(options.iter().cloned())
            .args(["install", package])
            .env("DEBIAN_FRONTEND", "noninteractive");

        let output = self.runner.run(&cmd, deadline)?;
        if !output.success {
            return Err(ActionError::from_package_output(&output.diagnostic(), package));
        }
        Ok(())
    }
}

/// RHEL and Fedora families: `rpm` / `yum` or `dnf`.
pub struct Yum {
    runner: Arc<dyn CommandRunner>,
    program: &'static str,
}

impl Yum {
    pub fn yum(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            program: "yum",
        }
    }

    pub fn dnf(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            program: "dnf",
        }
    }
}

impl PackageManager for Yum {
    fn name(&self) -> &'static str {
        self.program
    }

    fn is_installed(&self, package: &str, deadline: Option<Instant>) -> Result<bool, ActionError> {
        let query = CommandLine::new("rpm").args(["-q", "--whatprovides", package]);
        self.runner.run_status(&query, deadline)
    }

    fn install(
        &self,
        package: &str,
        options: &[String],
        deadline: Option<Instant>,
    ) -> Result<(), ActionError> {
        let cmd = CommandLine::new(self.program)
            .args(["-q", "-y"])
            .args(options.iter().cloned())
            .args(["install", package]);

        let output = self.runner.run(&cmd, deadline)?;
        if !output.success {
            return Err(ActionError::from_package_output(&output.diagnostic(), package));
        }
        Ok(())
    }
}

/// Pick the package manager for a platform family.
///
/// RHEL hosts prefer `dnf` when it is on PATH.
pub fn for_family(family: &str, runner: Arc<dyn CommandRunner>) -> Option<Box<dyn PackageManager>> {
    match family {
        "debian" => Some(Box::new(Apt::new(runner))),
        "fedora" => Some(Box::new(Yum::dnf(runner))),
        "rhel" if which::which("dnf").is_ok() => Some(Box::new(Yum::dnf(runner))),
        "rhel" => Some(Box::new(Yum::yum(runner))),
        _ => None,
    }
}
