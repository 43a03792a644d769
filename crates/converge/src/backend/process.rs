//! External command execution with deadlines

use crate::error::{ActionError, ErrorCategory};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A program invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// Build from an argv vector; `None` when empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs(mut self, vars: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Output from an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
        }
    }
}

impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
            success: true,
        }
    }

    pub fn fail(stderr: &str) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
            success: false,
        }
    }

    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Stderr, or stdout when stderr is empty; for error messages.
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr_str();
        if stderr.trim().is_empty() {
            self.stdout_str().trim().to_string()
        } else {
            stderr.trim().to_string()
        }
    }
}

/// Runs external programs.
///
/// The boundary every backend goes through, so tests can script the host.
pub trait CommandRunner: Send + Sync {
    /// Run to completion, or until `deadline` passes.
    ///
    /// A non-zero exit is not an error here; it is reported through
    /// [`CommandOutput::success`]. Errors mean the program could not run or
    /// was killed at the deadline.
    fn run(&self, cmd: &CommandLine, deadline: Option<Instant>) -> Result<CommandOutput, ActionError>;

    /// Run and require success, returning trimmed stdout.
    fn run_checked(
        &self,
        cmd: &CommandLine,
        deadline: Option<Instant>,
    ) -> Result<String, ActionError> {
        let output = self.run(cmd, deadline)?;
        if !output.success {
            return Err(ActionError::new(
                ErrorCategory::Command,
                format!("`{cmd}` failed: {}", output.diagnostic()),
            ));
        }
        Ok(output.stdout_str().trim().to_string())
    }

    /// Run and report only whether it succeeded.
    fn run_status(&self, cmd: &CommandLine, deadline: Option<Instant>) -> Result<bool, ActionError> {
        Ok(self.run(cmd, deadline)?.success)
    }
}

/// Runs real processes on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &CommandLine, deadline: Option<Instant>) -> Result<CommandOutput, ActionError> {
        log::debug!("Running: {}", cmd);

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .envs(&cmd.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &cmd.cwd {
            if !cwd.is_dir() {
                return Err(ActionError::new(
                    ErrorCategory::Filesystem,
                    format!("working directory {} does not exist", cwd.display()),
                ));
            }
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ActionError::new(
                ErrorCategory::NotFound,
                format!("program not found: {}", cmd.program),
            ),
            _ => ActionError::io(format!("failed to execute {}", cmd.program), &e),
        })?;

        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let success = match wait(&mut child, deadline) {
            Ok(Some(success)) => success,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ActionError::timeout(cmd));
            }
            Err(e) => return Err(ActionError::io(format!("waiting for {}", cmd.program), &e)),
        };

        // A background grandchild can hold the pipes open after the child exits
        let (Some(stdout), Some(stderr)) = (collect(&stdout, deadline), collect(&stderr, deadline))
        else {
            log::warn!("{cmd}: output still open at the deadline");
            return Err(ActionError::timeout(cmd));
        };

        Ok(CommandOutput {
            stdout,
            stderr,
            success,
        })
    }
}

/// Read a pipe to the end on its own thread so the child never blocks on a
/// full pipe while we poll for exit.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        let _ = tx.send(buf);
    });
    rx
}

/// Drained output; `None` when the deadline passed first.
fn collect(rx: &Receiver<Vec<u8>>, deadline: Option<Instant>) -> Option<Vec<u8>> {
    let Some(deadline) = deadline else {
        return Some(rx.recv().unwrap_or_default());
    };
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(buf) => Some(buf),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => Some(Vec::new()),
    }
}

/// Wait for exit; `Ok(None)` when the deadline passed first.
fn wait(child: &mut Child, deadline: Option<Instant>) -> io::Result<Option<bool>> {
    let Some(deadline) = deadline else {
        return child.wait().map(|status| Some(status.success()));
    };

    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status.success()));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}
