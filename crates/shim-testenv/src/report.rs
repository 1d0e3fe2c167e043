//! Per-step outcomes of a provisioning or teardown run.

use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{FailureReason, HarnessError, Result};

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    /// Nothing to do (e.g. shim already staged).
    Skipped,
    Failed { reason: FailureReason },
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

/// One executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(flatten)]
    pub outcome: StepOutcome,
}

/// Outcomes of a full run, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub steps: Vec<StepRecord>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: impl Into<String>, command: Option<String>, outcome: StepOutcome) {
        self.steps.push(StepRecord {
            step: step.into(),
            command,
            outcome,
        });
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(|r| r.outcome.is_failure())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Log a one-line summary plus one warning per failed step.
    pub fn log_summary(&self, run: &str) {
        let failed = self.failure_count();
        if failed == 0 {
            info!(
                target: "shim_testenv::report",
                run = %run,
                steps = self.steps.len(),
                "All steps succeeded"
            );
            return;
        }

        for record in self.failures() {
            if let StepOutcome::Failed { reason } = &record.outcome {
                warn!(
                    target: "shim_testenv::report",
                    run = %run,
                    step = %record.step,
                    reason = %reason,
                    "Step failed"
                );
            }
        }
        warn!(
            target: "shim_testenv::report",
            run = %run,
            steps = self.steps.len(),
            failed,
            "Run finished with failed steps"
        );
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| HarnessError::Report(e.to_string()))?;
        std::fs::write(path, json).map_err(|source| HarnessError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample() -> RunReport {
        let mut report = RunReport::new();
        report.record(
            "build node image",
            Some("docker build -t k3d-shim-test deployments/k3d".to_string()),
            StepOutcome::Succeeded,
        );
        report.record(
            "wait for nodes",
            Some("kubectl wait --for=condition=ready node --all --timeout=120s".to_string()),
            StepOutcome::Failed {
                reason: FailureReason::TimedOut {
                    after: Duration::from_secs(130),
                },
            },
        );
        report.record("settle after import", None, StepOutcome::Succeeded);
        report
    }

    #[test]
    fn test_failure_count() {
        let report = sample();
        assert_eq!(report.failure_count(), 1);
        assert_eq!(
            report.failures().next().map(|r| r.step.as_str()),
            Some("wait for nodes")
        );
    }

    #[test]
    fn test_json_shape() {
        let value = serde_json::to_value(sample()).unwrap();

        assert_eq!(value["steps"][0]["status"], "succeeded");
        assert_eq!(value["steps"][1]["status"], "failed");
        assert_eq!(value["steps"][1]["reason"]["kind"], "timed_out");
        assert_eq!(value["steps"][1]["reason"]["after"], 130);
        assert!(value["steps"][2].get("command").is_none());
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        sample().write_json(&path).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["steps"].as_array().unwrap().len(), 3);
    }
}
