//! External process invocation for the `aws` CLI.
//!
//! Package and deploy stay behind an external-process boundary rather than
//! SDK calls, so the dependency is swappable in tests via `CommandRunner`.
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;

/// Failures from locating or running the external CLI.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The executable could not be found on `PATH`.
    #[error("{program} not found on PATH (is the AWS CLI installed?)")]
    NotFound {
        program: String,
        #[source]
        source: which::Error,
    },
    /// The executable was found but could not be spawned.
    #[error("failed to launch {program}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The child process exited with a non-zero status. The child already
    /// printed its diagnostics on the inherited stderr.
    #[error("aws command exited with status {code}")]
    Failed { code: i32 },
}

/// Runs cloud CLI sub-commands as child processes.
pub trait CommandRunner {
    /// Run `<service> <subcommand> <args...>` with inherited stdio, blocking
    /// until the child exits.
    fn run(&self, service: &str, subcommand: &str, args: &[String]) -> Result<(), ExecError>;

    /// Run `<service> <subcommand> <args...>` capturing stdout, for
    /// machine-readable output.
    fn capture(&self, service: &str, subcommand: &str, args: &[String])
        -> Result<String, ExecError>;
}

/// The real `aws` CLI, resolved from `PATH` on first use.
pub struct AwsCli {
    program: PathBuf,
}

impl AwsCli {
    pub fn new() -> Self {
        let program = if cfg!(windows) { "aws.cmd" } else { "aws" };
        Self {
            program: PathBuf::from(program),
        }
    }

    /// Use a specific executable instead of the platform default.
    #[cfg(test)]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn resolved(&self) -> Result<PathBuf, ExecError> {
        which::which(&self.program).map_err(|source| ExecError::NotFound {
            program: self.program.display().to_string(),
            source,
        })
    }

    fn command(&self, service: &str, subcommand: &str, args: &[String]) -> Result<Command, ExecError> {
        let mut command = Command::new(self.resolved()?);
        command.arg(service).arg(subcommand).args(args);
        Ok(command)
    }

    fn launch_error(&self, source: std::io::Error) -> ExecError {
        ExecError::Launch {
            program: self.program.display().to_string(),
            source,
        }
    }
}

impl Default for AwsCli {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for AwsCli {
    fn run(&self, service: &str, subcommand: &str, args: &[String]) -> Result<(), ExecError> {
        tracing::debug!(service, subcommand, ?args, "executing aws command");
        let status = self
            .command(service, subcommand, args)?
            .status()
            .map_err(|source| self.launch_error(source))?;
        check_status(status)?;
        tracing::debug!(service, subcommand, "command successful");
        Ok(())
    }

    fn capture(
        &self,
        service: &str,
        subcommand: &str,
        args: &[String],
    ) -> Result<String, ExecError> {
        tracing::debug!(service, subcommand, ?args, "capturing aws command output");
        let output = self
            .command(service, subcommand, args)?
            .output()
            .map_err(|source| self.launch_error(source))?;
        check_status(output.status)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn check_status(status: ExitStatus) -> Result<(), ExecError> {
    if status.success() {
        return Ok(());
    }
    // A child killed by a signal has no exit code; report it as 1.
    Err(ExecError::Failed {
        code: status.code().unwrap_or(1),
    })
}

/// Render a path as a CLI argument.
pub fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
