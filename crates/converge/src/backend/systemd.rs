//! Process supervisor backend (systemd)

use super::process::{CommandLine, CommandRunner};
use crate::error::{ActionError, ErrorCategory};
use crate::spec::ServiceSpec;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Interface to the host's service manager.
pub trait ServiceManager: Send + Sync {
    /// Render the definition the manager should hold for `service`.
    fn definition(&self, service: &ServiceSpec) -> String;

    /// Definition currently installed, if any.
    fn installed_definition(&self, name: &str) -> Result<Option<String>, ActionError>;

    /// Install or replace the definition and make the manager reload it.
    fn install_definition(
        &self,
        name: &str,
        definition: &str,
        deadline: Option<Instant>,
    ) -> Result<(), ActionError>;

    fn is_active(&self, name: &str, deadline: Option<Instant>) -> Result<bool, ActionError>;

    fn is_enabled(&self, name: &str, deadline: Option<Instant>) -> Result<bool, ActionError>;

    fn enable(&self, name: &str, deadline: Option<Instant>) -> Result<(), ActionError>;

    fn start(&self, name: &str, deadline: Option<Instant>) -> Result<(), ActionError>;

    fn restart(&self, name: &str, deadline: Option<Instant>) -> Result<(), ActionError>;
}

/// systemd, driven through unit files and `systemctl`.
pub struct Systemd {
    runner: Arc<dyn CommandRunner>,
    unit_dir: PathBuf,
}

impl Systemd {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            unit_dir: PathBuf::from("/etc/systemd/system"),
        }
    }

    pub fn with_unit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.unit_dir = dir.into();
        self
    }

    fn unit_path(&self, name: &str) -> PathBuf {
        self.unit_dir.join(format!("{name}.service"))
    }

    fn systemctl(
        &self,
        verb: &str,
        name: Option<&str>,
        deadline: Option<Instant>,
    ) -> Result<(), ActionError> {
        let mut cmd = CommandLine::new("systemctl").arg(verb);
        if let Some(name) = name {
            cmd = cmd.arg(format!("{name}.service"));
        }

        let output = self.runner.run(&cmd, deadline)?;
        if !output.success {
            return Err(ActionError::new(
                ErrorCategory::Service,
                format!("`{cmd}` failed: {}", output.diagnostic()),
            ));
        }
        Ok(())
    }

    fn query(&self, verb: &str, name: &str, deadline: Option<Instant>) -> Result<bool, ActionError> {
        let cmd = CommandLine::new("systemctl")
            .args([verb, "--quiet"])
            .arg(format!("{name}.service"));
        self.runner.run_status(&cmd, deadline)
    }
}

/// Quote an argument for an `ExecStart=` or `Environment=` line.
///
/// systemd expands `%` specifiers in both, so a literal `%` is doubled.
fn quote(arg: &str) -> String {
    let arg = arg.replace('%', "%%");
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        return arg;
    }
    format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
}

impl ServiceManager for Systemd {
    fn definition(&self, service: &ServiceSpec) -> String {
        let mut unit = String::new();
        let _ = writeln!(unit, "[Unit]");
        let _ = writeln!(unit, "Description={} (managed by provision)", service.name);
        let _ = writeln!(unit, "After=network.target");
        let _ = writeln!(unit);
        let _ = writeln!(unit, "[Service]");
        let _ = writeln!(unit, "Type=simple");
        if let Some(user) = &service.user {
            let _ = writeln!(unit, "User={user}");
        }
        if let Some(dir) = &service.working_dir {
            let _ = writeln!(unit, "WorkingDirectory={}", dir.display());
        }
        for (key, value) in &service.environment {
            let _ = writeln!(unit, "Environment={}", quote(&format!("{key}={value}")));
        }
        let exec: Vec<String> = service.command.iter().map(|a| quote(a)).collect();
        let _ = writeln!(unit, "ExecStart={}", exec.join(" "));
        let _ = writeln!(unit, "Restart=on-failure");
        let _ = writeln!(unit);
        let _ = writeln!(unit, "[Install]");
        let _ = writeln!(unit, "WantedBy=multi-user.target");
        unit
    }

    fn installed_definition(&self, name: &str) -> Result<Option<String>, ActionError> {
        let path = self.unit_path(name);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ActionError::io(format!("reading {}", path.display()), &e)),
        }
    }

    fn install_definition(
        &self,
        name: &str,
        definition: &str,
        deadline: Option<Instant>,
    ) -> Result<(), ActionError> {
        let path = self.unit_path(name);
        fs::create_dir_all(&self.unit_dir)
            .map_err(|e| ActionError::io(format!("creating {}", self.unit_dir.display()), &e))?;
        fs::write(&path, definition)
            .map_err(|e| ActionError::io(format!("writing {}", path.display()), &e))?;
        self.systemctl("daemon-reload", None, deadline)
    }

    fn is_active(&self, name: &str, deadline: Option<Instant>) -> Result<bool, ActionError> {
        self.query("is-active", name, deadline)
    }

    fn is_enabled(&self, name: &str, deadline: Option<Instant>) -> Result<bool, ActionError> {
        self.query("is-enabled", name, deadline)
    }

    fn enable(&self, name: &str, deadline: Option<Instant>) -> Result<(), ActionError> {
        self.systemctl("enable", Some(name), deadline)
    }

    fn start(&self, name: &str, deadline: Option<Instant>) -> Result<(), ActionError> {
        self.systemctl("start", Some(name), deadline)
    }

    fn restart(&self, name: &str, deadline: Option<Instant>) -> Result<(), ActionError> {
        self.systemctl("restart", Some(name), deadline)
    }
}
