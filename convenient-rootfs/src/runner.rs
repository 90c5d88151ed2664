//! External command execution
//!
//! Every compiler, `make`, `git` and `pacman` invocation goes through the
//! [`CommandRunner`] trait so the orchestrator can be driven by a recording
//! fake in tests. [`SystemRunner`] is the real implementation: it spawns the
//! process and forwards its output line by line to `tracing` while the
//! process is still running.

use crate::env::BuildEnv;
use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from running an external command
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The command ran and exited with a code other than 0
    #[error("{command} exited with code {code}")]
    NonZeroExit {
        /// Command line that failed
        command: String,
        /// Its exit code
        code: i32,
    },

    /// The command was killed before it could exit
    #[error("{command} was terminated by a signal")]
    Signalled {
        /// Command line that was killed
        command: String,
    },

    /// The program could not be started at all
    #[error("Failed to start {command}: {source}")]
    Spawn {
        /// Command line that could not start
        command: String,
        /// Underlying spawn error
        #[source]
        source: io::Error,
    },

    /// The argument vector was empty
    #[error("Empty command line")]
    EmptyCommand,

    /// Reading the child's output or waiting for it failed
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ExecutionError {
    /// Exit code of the failed command, if it exited normally.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for command execution
pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// A single command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program followed by its arguments
    pub argv: Vec<String>,

    /// Working directory
    pub cwd: PathBuf,

    /// Complete environment for the child. An empty map inherits the
    /// environment of the current process.
    pub env: BTreeMap<String, String>,

    /// Short label used in log lines, e.g. `zlib: configure`
    pub description: String,
}

impl CommandSpec {
    /// Create a spec running `argv` in `cwd` with the inherited environment.
    pub fn new<I, S>(argv: I, cwd: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        let description = argv.join(" ");
        Self {
            argv,
            cwd: cwd.into(),
            env: BTreeMap::new(),
            description,
        }
    }

    /// Use `env` as the full child environment.
    #[must_use]
    pub fn with_env(mut self, env: &BuildEnv) -> Self {
        self.env = env.vars().clone();
        self
    }

    /// Replace the log label.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The program being run, if any.
    #[must_use]
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// The command line joined with spaces.
    #[must_use]
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// Executes commands on behalf of the dispatcher.
pub trait CommandRunner {
    /// Run a command to completion, streaming its output.
    ///
    /// # Errors
    ///
    /// Fails when the command cannot be started or does not exit with 0.
    fn run(&self, spec: &CommandSpec) -> ExecutionResult<()>;

    /// Run a command to completion and return its standard output.
    ///
    /// # Errors
    ///
    /// Fails when the command cannot be started or does not exit with 0.
    fn capture(&self, spec: &CommandSpec) -> ExecutionResult<String>;
}

/// Runs commands as child processes of the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    /// Create a new runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn command(spec: &CommandSpec) -> ExecutionResult<Command> {
        let (program, args) = spec
            .argv
            .split_first()
            .ok_or(ExecutionError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        let _ = cmd.args(args).current_dir(&spec.cwd);
        if !spec.env.is_empty() {
            let _ = cmd.env_clear().envs(&spec.env);
        }
        Ok(cmd)
    }

    fn check_status(spec: &CommandSpec, status: ExitStatus) -> ExecutionResult<()> {
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(ExecutionError::NonZeroExit {
                command: spec.command_line(),
                code,
            }),
            None => Err(ExecutionError::Signalled {
                command: spec.command_line(),
            }),
        }
    }
}

/// Wait for `child` once its output has been drained.
///
/// When draining failed the child is killed first, so it never outlives the
/// call as a zombie.
fn reap(child: &mut Child, drained: io::Result<()>) -> ExecutionResult<ExitStatus> {
    if let Err(e) = drained {
        let _ = child.kill();
        let _ = child.wait();
        return Err(e.into());
    }
    Ok(child.wait()?)
}

/// Forward each line of `reader` to `emit` as soon as it is read.
fn forward_lines<R: Read>(reader: R, emit: impl Fn(&str)) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line);
        emit(text.trim_end_matches(['\r', '\n']));
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> ExecutionResult<()> {
        info!("💻 {}: {}", spec.description, spec.command_line());
        debug!("  in {}", spec.cwd.display());

        let mut child = Self::command(spec)?
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                command: spec.command_line(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let label = spec.description.as_str();

        let drained = std::thread::scope(|scope| -> io::Result<()> {
            let err_handle = stderr.map(|pipe| {
                scope.spawn(move || forward_lines(pipe, |l| warn!("[{label}] {l}")))
            });
            if let Some(pipe) = stdout {
                forward_lines(pipe, |l| info!("[{label}] {l}"))?;
            }
            if let Some(handle) = err_handle {
                handle
                    .join()
                    .map_err(|_| io::Error::other("stderr reader panicked"))??;
            }
            Ok(())
        });

        let status = reap(&mut child, drained)?;
        Self::check_status(spec, status)
    }

    fn capture(&self, spec: &CommandSpec) -> ExecutionResult<String> {
        debug!("{}: {}", spec.description, spec.command_line());

        let output = Self::command(spec)?
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ExecutionError::Spawn {
                command: spec.command_line(),
                source,
            })?;

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            debug!("[{}] {line}", spec.description);
        }
        Self::check_status(spec, output.status)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Convenience for building a spec that runs in `cwd` with `env`.
pub(crate) fn spec_in<I, S>(
    argv: I,
    cwd: &Path,
    env: &BuildEnv,
    description: String,
) -> CommandSpec
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    CommandSpec::new(argv, cwd).with_env(env).describe(description)
}
