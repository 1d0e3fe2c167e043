//! External command execution.
//!
//! Every interaction with k3d, docker, kubectl and cross goes through the
//! [`CommandRunner`] trait so the sequencers can be driven by a recording mock
//! in tests.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use crate::error::{HarnessError, Result};

/// One external command: program, arguments and working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn new(program: impl Into<String>, cwd: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Shell-like rendering used in logs and test assertions.
    pub fn command_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Exit status of a finished command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    /// Exit code, or `None` if the process was killed by a signal.
    pub code: Option<i32>,
}

impl CommandStatus {
    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

/// Trait for running external commands (enables mocking).
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion.
    ///
    /// Returns `Err` only when the program could not be started; a non-zero
    /// exit is reported through [`CommandStatus`].
    async fn run(&self, invocation: &Invocation) -> Result<CommandStatus>;
}

/// Runs commands as child processes.
///
/// The child inherits stdout and stderr so tool output streams to the
/// console. Dropping the future kills the child.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandStatus> {
        debug!(
            target: "shim_testenv::runner",
            command = %invocation,
            cwd = %invocation.cwd.display(),
            "Spawning command"
        );

        let status = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| HarnessError::Spawn {
                program: invocation.program.clone(),
                message: e.to_string(),
            })?;

        Ok(CommandStatus {
            code: status.code(),
        })
    }
}

/// Mock command runner module for testing.
///
/// This module provides a runner that records every invocation and answers
/// with scripted results instead of spawning processes.
pub mod mock {

    use super::*;
    use std::sync::{Mutex, PoisonError};

    /// Scripted response for a matching invocation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Scripted {
        /// Finish with this exit code.
        Exit(i32),
        /// Fail to start, as if the program were missing.
        SpawnError,
        /// Never finish.
        Hang,
    }

    /// Recording mock runner.
    ///
    /// Rules are matched in insertion order against the rendered command
    /// line by prefix; the first match wins, otherwise the default applies.
    pub struct RecordingRunner {
        invocations: Mutex<Vec<Invocation>>,
        rules: Vec<(String, Scripted)>,
        default: Scripted,
    }

    impl RecordingRunner {
        /// Create a mock where every command exits 0.
        pub fn succeeding() -> Self {
            Self::with_default(Scripted::Exit(0))
        }

        /// Create a mock where every command exits 1.
        pub fn failing() -> Self {
            Self::with_default(Scripted::Exit(1))
        }

        pub fn with_default(default: Scripted) -> Self {
            Self {
                invocations: Mutex::new(Vec::new()),
                rules: Vec::new(),
                default,
            }
        }

        /// Answer commands whose command line starts with `prefix`.
        #[must_use]
        pub fn with_rule(mut self, prefix: impl Into<String>, response: Scripted) -> Self {
            self.rules.push((prefix.into(), response));
            self
        }

        /// All invocations received so far, in order.
        pub fn invocations(&self) -> Vec<Invocation> {
            self.invocations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Rendered command lines of all invocations, in order.
        pub fn command_lines(&self) -> Vec<String> {
            self.invocations()
                .iter()
                .map(Invocation::command_line)
                .collect()
        }

        fn response_for(&self, command_line: &str) -> Scripted {
            self.rules
                .iter()
                .find(|(prefix, _)| command_line.starts_with(prefix.as_str()))
                .map_or(self.default, |(_, response)| *response)
        }
    }

    #[async_trait::async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, invocation: &Invocation) -> Result<CommandStatus> {
            self.invocations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(invocation.clone());

            match self.response_for(&invocation.command_line()) {
                Scripted::Exit(code) => Ok(CommandStatus { code: Some(code) }),
                Scripted::SpawnError => Err(HarnessError::Spawn {
                    program: invocation.program.clone(),
                    message: "No such file or directory (os error 2)".to_string(),
                }),
                Scripted::Hang => std::future::pending::<Result<CommandStatus>>().await,
            }
        }
    }

}
