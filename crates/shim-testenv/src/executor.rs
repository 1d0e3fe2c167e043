//! Step execution.
//!
//! A [`Step`] is one labelled action. The [`StepExecutor`] runs steps one at a
//! time, records every outcome and applies the [`FailurePolicy`]: under
//! `Continue` a failed step is logged and the run goes on, under `Abort` the
//! first failure is returned as [`HarnessError::StepFailed`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::FailurePolicy;
use crate::error::{FailureReason, HarnessError, Result};
use crate::report::{RunReport, StepOutcome};
use crate::runner::{CommandRunner, Invocation};

/// Extra time granted past a bounded command's own timeout before the
/// harness gives up on it.
pub const WAIT_GRACE: Duration = Duration::from_secs(10);

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run a command to completion.
    Run(Invocation),
    /// Run a command that must finish before `deadline`.
    BoundedRun {
        invocation: Invocation,
        deadline: Duration,
    },
    /// Create a directory (and parents), relative to the root.
    EnsureDir(PathBuf),
    /// Copy a file and mark it executable. Both paths are relative to the root.
    InstallFile { from: PathBuf, to: PathBuf },
    /// Pause without checking anything.
    Sleep(Duration),
}

/// A labelled action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub label: String,
    pub action: Action,
}

impl Step {
    pub fn run(label: impl Into<String>, invocation: Invocation) -> Self {
        Self {
            label: label.into(),
            action: Action::Run(invocation),
        }
    }

    pub fn bounded(label: impl Into<String>, invocation: Invocation, deadline: Duration) -> Self {
        Self {
            label: label.into(),
            action: Action::BoundedRun {
                invocation,
                deadline,
            },
        }
    }

    pub fn ensure_dir(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            action: Action::EnsureDir(path.into()),
        }
    }

    pub fn install_file(
        label: impl Into<String>,
        from: impl Into<PathBuf>,
        to: impl Into<PathBuf>,
    ) -> Self {
        Self {
            label: label.into(),
            action: Action::InstallFile {
                from: from.into(),
                to: to.into(),
            },
        }
    }

    pub fn sleep(label: impl Into<String>, duration: Duration) -> Self {
        Self {
            label: label.into(),
            action: Action::Sleep(duration),
        }
    }

    /// The command this step runs, if any.
    pub fn invocation(&self) -> Option<&Invocation> {
        match &self.action {
            Action::Run(invocation) | Action::BoundedRun { invocation, .. } => Some(invocation),
            _ => None,
        }
    }
}

/// Runs steps sequentially and collects their outcomes.
pub struct StepExecutor<'a> {
    runner: &'a dyn CommandRunner,
    root: PathBuf,
    policy: FailurePolicy,
    report: RunReport,
}

impl<'a> StepExecutor<'a> {
    pub fn new(runner: &'a dyn CommandRunner, root: impl AsRef<Path>, policy: FailurePolicy) -> Self {
        Self {
            runner,
            root: root.as_ref().to_path_buf(),
            policy,
            report: RunReport::new(),
        }
    }

    /// Execute one step.
    ///
    /// Returns `Err` only when the step failed and the policy is `Abort`.
    pub async fn execute(&mut self, step: &Step) -> Result<()> {
        let command = step.invocation().map(Invocation::command_line);
        info!(
            target: "shim_testenv::executor",
            step = %step.label,
            command = command.as_deref().unwrap_or(""),
            ">>> {}",
            step.label
        );

        let outcome = match &step.action {
            Action::Run(invocation) => self.run_command(invocation).await,
            Action::BoundedRun {
                invocation,
                deadline,
            } => {
                match tokio::time::timeout(*deadline, self.run_command(invocation)).await {
                    Ok(outcome) => outcome,
                    Err(_) => StepOutcome::Failed {
                        reason: FailureReason::TimedOut { after: *deadline },
                    },
                }
            }
            Action::EnsureDir(path) => {
                let path = self.root.join(path);
                io_outcome(tokio::fs::create_dir_all(&path).await, &path)
            }
            Action::InstallFile { from, to } => {
                let from = self.root.join(from);
                let to = self.root.join(to);
                io_outcome(install_file(&from, &to).await, &from)
            }
            Action::Sleep(duration) => {
                tokio::time::sleep(*duration).await;
                StepOutcome::Succeeded
            }
        };

        self.settle(&step.label, command, outcome)
    }

    /// Record a step that had nothing to do.
    pub fn skip(&mut self, label: &str, why: &str) {
        info!(
            target: "shim_testenv::executor",
            step = %label,
            "Skipping: {}",
            why
        );
        self.report.record(label, None, StepOutcome::Skipped);
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    pub fn into_report(self) -> RunReport {
        self.report
    }

    async fn run_command(&self, invocation: &Invocation) -> StepOutcome {
        match self.runner.run(invocation).await {
            Ok(status) if status.success() => StepOutcome::Succeeded,
            Ok(status) => StepOutcome::Failed {
                reason: FailureReason::ExitStatus { code: status.code },
            },
            Err(e) => StepOutcome::Failed { reason: e.into() },
        }
    }

    fn settle(&mut self, label: &str, command: Option<String>, outcome: StepOutcome) -> Result<()> {
        let failure = match &outcome {
            StepOutcome::Failed { reason } => Some(reason.clone()),
            _ => None,
        };
        self.report.record(label, command.clone(), outcome);

        let Some(reason) = failure else {
            return Ok(());
        };

        match self.policy {
            FailurePolicy::Continue => {
                warn!(
                    target: "shim_testenv::executor",
                    step = %label,
                    command = command.as_deref().unwrap_or(""),
                    reason = %reason,
                    "Step failed, continuing"
                );
                Ok(())
            }
            FailurePolicy::Abort => Err(HarnessError::StepFailed {
                step: label.to_string(),
                reason,
            }),
        }
    }
}

fn io_outcome(result: std::io::Result<()>, path: &Path) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Succeeded,
        Err(e) => StepOutcome::Failed {
            reason: FailureReason::Io {
                message: format!("{}: {e}", path.display()),
            },
        },
    }
}

async fn install_file(from: &Path, to: &Path) -> std::io::Result<()> {
    tokio::fs::copy(from, to).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(to, std::fs::Permissions::from_mode(0o755)).await?;
    }

    Ok(())
}
