//! Cluster teardown.
//!
//! Always issues exactly two commands: delete the cluster, then remove the
//! node image. Neither result is inspected beyond logging, so tearing down a
//! cluster that was never created is harmless.

use tracing::warn;

use crate::config::{Config, FailurePolicy};
use crate::executor::{Step, StepExecutor};
use crate::report::RunReport;
use crate::runner::{CommandRunner, Invocation};

/// Teardown steps, in execution order.
pub fn plan(config: &Config) -> Vec<Step> {
    vec![
        Step::run(
            "delete cluster",
            Invocation::new("k3d", &config.root).args([
                "cluster".to_string(),
                "delete".to_string(),
                config.cluster_name.clone(),
            ]),
        ),
        Step::run(
            "remove node image",
            Invocation::new("docker", &config.root)
                .args(["rmi".to_string(), config.node_image.clone()]),
        ),
    ]
}

/// Run the teardown sequence.
///
/// Failures are recorded in the report and logged; they never abort.
pub async fn teardown(config: &Config, runner: &dyn CommandRunner) -> RunReport {
    let mut executor = StepExecutor::new(runner, &config.root, FailurePolicy::Continue);

    for step in plan(config) {
        if let Err(e) = executor.execute(&step).await {
            warn!(target: "shim_testenv::teardown", step = %step.label, error = %e, "Teardown step failed");
        }
    }

    let report = executor.into_report();
    report.log_summary("teardown");
    report
}
