//! Harness error types.
//!
//! Only two conditions abort a run: a dependency that cannot be resolved, and
//! a failed step when the fail-fast policy is enabled. Everything else is
//! recorded as a [`StepOutcome`](crate::report::StepOutcome) and the run
//! continues.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Harness error type.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A required tool is not on the search path, or a prebuilt artifact is
    /// missing from its source location.
    #[error("Missing dependency: {name}")]
    MissingDependency { name: String },

    /// A provisioning step failed and the fail-fast policy is in effect.
    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: FailureReason },

    /// The external program could not be started.
    #[error("Failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    /// Local filesystem operation failed.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The provision report could not be serialized.
    #[error("Report error: {0}")]
    Report(String),
}

/// Why a single step did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The command ran and exited unsuccessfully. `None` means it was killed
    /// by a signal.
    ExitStatus { code: Option<i32> },

    /// The command could not be started.
    Spawn { message: String },

    /// A bounded step did not finish before its deadline.
    TimedOut {
        #[serde(with = "duration_secs")]
        after: Duration,
    },

    /// A local filesystem action failed.
    Io { message: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::ExitStatus { code: Some(code) } => write!(f, "exited with status {code}"),
            FailureReason::ExitStatus { code: None } => write!(f, "terminated by signal"),
            FailureReason::Spawn { message } => write!(f, "could not start: {message}"),
            FailureReason::TimedOut { after } => write!(f, "timed out after {}s", after.as_secs()),
            FailureReason::Io { message } => write!(f, "I/O error: {message}"),
        }
    }
}

impl From<HarnessError> for FailureReason {
    fn from(err: HarnessError) -> Self {
        match err {
            HarnessError::Spawn { message, .. } => FailureReason::Spawn { message },
            HarnessError::StepFailed { reason, .. } => reason,
            other => FailureReason::Io {
                message: other.to_string(),
            },
        }
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// Result type alias using `HarnessError`.
pub type Result<T> = std::result::Result<T, HarnessError>;
