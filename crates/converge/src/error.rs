//! Error types for provisioning runs.
//!
//! Two layers of failure exist. [`Error`] covers everything that stops a
//! run before any action touches the host (facts, planning, input
//! validation). [`ActionError`] describes why a single action failed; it is
//! recorded in the action's result and never aborts the run on its own.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Errors that abort a run before execution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// A mandatory host fact could not be determined
    #[error("required fact unavailable: {fact}")]
    FactUnavailable {
        /// Key of the missing fact
        fact: String,
    },

    /// No selection rule matches the resolved facts for a resource
    #[error("unsupported platform for '{spec}': {reason}")]
    UnsupportedPlatform {
        /// Id of the resource that could not be planned
        spec: String,
        /// Why selection failed
        reason: String,
    },

    /// A resource declaration is malformed
    #[error("invalid resource '{spec}': {message}")]
    InvalidSpec {
        /// Id of the offending resource (may be empty when the id itself is bad)
        spec: String,
        /// What is wrong with it
        message: String,
    },
}

impl Error {
    pub fn invalid(spec: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSpec {
            spec: spec.into(),
            message: message.into(),
        }
    }

    pub fn unsupported(spec: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::UnsupportedPlatform {
            spec: spec.into(),
            reason: reason.to_string(),
        }
    }

    /// Process exit status this error maps to.
    ///
    /// Malformed input is `2`; every other pre-execution failure is `1`.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidSpec { .. } => 2,
            Self::FactUnavailable { .. } | Self::UnsupportedPlatform { .. } => 1,
        }
    }
}

/// Result type for planning and fact resolution.
pub type Result<T> = std::result::Result<T, Error>;

/// Categories of action failures.
///
/// Categories let the reporter and the CLI explain a failure without
/// parsing tool output a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The package manager reported an error
    PackageManager,
    /// A package, program or reference does not exist
    NotFound,
    /// The package database is locked by another process
    Lock,
    /// Reading or writing the filesystem failed
    Filesystem,
    /// Permission denied
    Permission,
    /// Network unreachable, DNS failure, download error
    Network,
    /// Authentication or signature verification failed
    Auth,
    /// The service manager refused an operation
    Service,
    /// The action exceeded its time budget
    Timeout,
    /// A command exited unsuccessfully
    Command,
}

impl ErrorCategory {
    pub fn description(&self) -> &'static str {
        match self {
            Self::PackageManager => "package manager error",
            Self::NotFound => "not found",
            Self::Lock => "package database locked",
            Self::Filesystem => "filesystem error",
            Self::Permission => "permission denied",
            Self::Network => "network error",
            Self::Auth => "authentication failure",
            Self::Service => "service error",
            Self::Timeout => "timed out",
            Self::Command => "command failed",
        }
    }

    /// Short advice shown next to failures in the run summary.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::PackageManager => "Inspect the package manager output above",
            Self::NotFound => "Check the name against the platform's repositories",
            Self::Lock => "Wait for the other package manager process to finish and re-run",
            Self::Filesystem => "Check that the target directory exists and has space",
            Self::Permission => "Run as root or fix ownership of the target path",
            Self::Network => "Check connectivity and re-run; runs are idempotent",
            Self::Auth => "Check credentials, deploy keys or repository signing keys",
            Self::Service => "Inspect the unit with `systemctl status` and `journalctl -u`",
            Self::Timeout => "Raise the timeout or investigate the slow step",
            Self::Command => "Inspect the command output above",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Why a single action failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{category}: {message}")]
pub struct ActionError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ActionError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn timeout(what: impl fmt::Display) -> Self {
        Self::new(ErrorCategory::Timeout, format!("{what} exceeded its time budget"))
    }

    /// Wrap an IO error, keeping permission problems distinguishable.
    pub fn io(context: impl fmt::Display, err: &io::Error) -> Self {
        let category = match err.kind() {
            io::ErrorKind::PermissionDenied => ErrorCategory::Permission,
            io::ErrorKind::NotFound => ErrorCategory::NotFound,
            _ => ErrorCategory::Filesystem,
        };
        Self::new(category, format!("{context}: {err}"))
    }

    /// Categorise package manager stderr.
    pub fn from_package_output(stderr: &str, package: &str) -> Self {
        let lower = stderr.to_lowercase();
        let detail = stderr.trim();

        if lower.contains("could not get lock")
            || lower.contains("unable to lock")
            || lower.contains("another app is currently holding the yum lock")
            || lower.contains("waiting for process with pid")
        {
            return Self::new(ErrorCategory::Lock, detail);
        }

        if lower.contains("cannot be authenticated")
            || lower.contains("no_pubkey")
            || lower.contains("gpg check failed")
            || lower.contains("public key for")
        {
            return Self::new(ErrorCategory::Auth, detail);
        }

        if lower.contains("temporary failure resolving")
            || lower.contains("could not resolve")
            || lower.contains("failed to fetch")
            || lower.contains("cannot find a valid baseurl")
            || lower.contains("connection timed out")
            || lower.contains("network is unreachable")
        {
            return Self::new(ErrorCategory::Network, detail);
        }

        if lower.contains("unable to locate package")
            || lower.contains("has no installation candidate")
            || lower.contains("no package ")
            || lower.contains("no match for argument")
            || lower.contains("nothing provides")
        {
            return Self::new(ErrorCategory::NotFound, format!("package not found: {package}"));
        }

        if lower.contains("permission denied")
            || lower.contains("are you root")
            || lower.contains("you need to be root")
        {
            return Self::new(ErrorCategory::Permission, detail);
        }

        Self::new(
            ErrorCategory::PackageManager,
            format!("installing {package} failed: {detail}"),
        )
    }

    /// Categorise git stderr.
    pub fn from_git_output(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        let detail = stderr.trim();

        if lower.contains("authentication failed")
            || lower.contains("permission denied (publickey)")
            || lower.contains("could not read username")
            || lower.contains("host key verification failed")
        {
            return Self::new(ErrorCategory::Auth, detail);
        }

        if lower.contains("could not resolve host")
            || lower.contains("unable to access")
            || lower.contains("connection refused")
            || lower.contains("connection timed out")
            || lower.contains("network is unreachable")
        {
            return Self::new(ErrorCategory::Network, detail);
        }

        if lower.contains("repository not found") || lower.contains("does not exist") {
            return Self::new(ErrorCategory::NotFound, detail);
        }

        Self::new(ErrorCategory::Command, detail)
    }
}
