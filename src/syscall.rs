// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command invocation.
//!
//! Sitesnap leans on a handful of external tools: a database dump and restore
//! client, a dependency installer, and a cache clearing command. Every one of
//! them is invoked through the [`Syscall`] trait so that callers only deal
//! with an exit code and captured output, and so tests can swap in canned
//! tool behavior.

use std::{
    ffi::{OsStr, OsString},
    fmt::{Display, Formatter, Result as FmtResult},
    fs::File,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use tracing::{debug, instrument};

/// Maximum number of trailing stderr lines kept in error excerpts.
const EXCERPT_LINES: usize = 10;

/// Layer of indirection for running external commands.
pub trait Syscall {
    /// Run command to completion.
    ///
    /// A non-zero exit status is not an error at this layer. Callers inspect
    /// [`CallOutput`] and decide what failure means for them.
    fn call(&self, call: &Call) -> Result<CallOutput>;

    /// Ensure program is available before any work starts.
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError::NotFound`] if program cannot be found.
    fn require(&self, program: &str) -> Result<PathBuf> {
        require_program(program)
    }
}

/// Description of one external command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Call {
    program: OsString,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
    current_dir: Option<PathBuf>,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
}

impl Call {
    /// Construct new call to target program.
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a listing of arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set environment variable for child process only.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Run child process in target directory.
    pub fn current_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(path.into());
        self
    }

    /// Feed target file to stdin of child process.
    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Write stdout of child process into target file instead of capturing it.
    pub fn stdout_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn arguments(&self) -> &[OsString] {
        &self.args
    }

    /// Lookup environment variable set for this call.
    pub fn env_value(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k.as_os_str() == key.as_ref())
            .map(|(_, v)| v.as_os_str())
    }

    pub fn stdin_path(&self) -> Option<&Path> {
        self.stdin.as_deref()
    }

    pub fn stdout_path(&self) -> Option<&Path> {
        self.stdout.as_deref()
    }
}

// INVARIANT: Never display environment variables, they may carry secrets.
impl Display for Call {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(fmt, " {}", arg.to_string_lossy())?;
        }

        Ok(())
    }
}

/// Result of running an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOutput {
    /// Exit code. Is `None` if process was killed by a signal.
    pub code: Option<i32>,

    /// Captured stdout. Empty if stdout was redirected to a file.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,
}

impl CallOutput {
    /// Construct successful output with given stdout.
    pub fn success_with(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last few lines of stderr for error reporting.
    pub fn stderr_excerpt(&self) -> String {
        let lines = self.stderr.lines().collect::<Vec<_>>();
        let start = lines.len().saturating_sub(EXCERPT_LINES);
        lines[start..].join("\n")
    }

    /// Turn non-zero exit status into [`SyscallError::Failed`].
    ///
    /// # Errors
    ///
    /// - Return [`SyscallError::Failed`] if command did not succeed.
    pub fn checked(self, call: &Call) -> Result<Self> {
        if !self.success() {
            return Err(SyscallError::Failed {
                command: call.to_string(),
                code: self.code,
                message: self.stderr_excerpt(),
            });
        }

        Ok(self)
    }
}

/// Run external commands through the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCall;

impl Syscall for SystemCall {
    #[instrument(skip(self, call), fields(command = %call), level = "debug")]
    fn call(&self, call: &Call) -> Result<CallOutput> {
        let mut command = Command::new(&call.program);
        command.args(&call.args);
        for (key, value) in &call.envs {
            command.env(key, value);
        }
        if let Some(dir) = &call.current_dir {
            command.current_dir(dir);
        }

        let stdin = match &call.stdin {
            Some(path) => Stdio::from(open_redirect(path, |p| File::open(p))?),
            None => Stdio::null(),
        };
        command.stdin(stdin);

        if let Some(path) = &call.stdout {
            command.stdout(Stdio::from(open_redirect(path, |p| File::create(p))?));
        }

        let output = command.output().map_err(|err| SyscallError::Spawn {
            source: err,
            program: call.program.to_string_lossy().into_owned(),
        })?;

        let result = CallOutput {
            code: output.status.code(),
            stdout: chomp(String::from_utf8_lossy(&output.stdout).into_owned()),
            stderr: chomp(String::from_utf8_lossy(&output.stderr).into_owned()),
        };
        debug!("exit code {:?}", result.code);

        Ok(result)
    }
}

/// Locate required program on `PATH`.
///
/// # Errors
///
/// - Return [`SyscallError::NotFound`] if program cannot be found.
pub fn require_program(program: impl AsRef<OsStr>) -> Result<PathBuf> {
    which::which(program.as_ref()).map_err(|_| SyscallError::NotFound {
        program: program.as_ref().to_string_lossy().into_owned(),
    })
}

fn open_redirect(
    path: &Path,
    open: impl FnOnce(&Path) -> std::io::Result<File>,
) -> Result<File> {
    open(path).map_err(|err| SyscallError::Redirect {
        source: err,
        path: path.to_path_buf(),
    })
}

// INVARIANT: Chomp trailing newlines.
fn chomp(message: String) -> String {
    message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message)
}

/// External command error types.
#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    /// Program could not be started at all.
    #[error("failed to run {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// File used for stdin or stdout redirection cannot be opened.
    #[error("failed to open {:?} for redirection", path.display())]
    Redirect {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Program exited with failure.
    #[error("command {command:?} failed with exit code {code:?}:\n{message}")]
    Failed {
        command: String,
        code: Option<i32>,
        message: String,
    },

    /// Program is not available on `PATH`.
    #[error("required program {program:?} not found on PATH")]
    NotFound { program: String },
}

/// Friendly result alias :3
pub type Result<T, E = SyscallError> = std::result::Result<T, E>;
