//! Test environment setup: preflight, shim staging, then provisioning.

use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::executor::StepExecutor;
use crate::report::RunReport;
use crate::runner::CommandRunner;
use crate::{preflight, provision, stager};

/// Bring the test cluster up.
///
/// Returns `Err` when a dependency is missing (nothing has run yet) or, under
/// the fail-fast policy, when a step fails. Under the default policy step
/// failures only show up in the returned report.
pub async fn setup(config: &Config, runner: &dyn CommandRunner) -> Result<RunReport> {
    info!(
        target: "shim_testenv::setup",
        cluster = %config.cluster_name,
        target_triple = %config.target,
        workloads = config.workloads.len(),
        root = %config.root.display(),
        "Setting up shim test environment"
    );

    preflight::check(config).map_err(|e| {
        error!(target: "shim_testenv::setup", error = %e, "Preflight failed, nothing was run");
        e
    })?;

    let mut executor = StepExecutor::new(runner, &config.root, config.failure_policy);
    let result = run_steps(config, &mut executor).await;
    let report = executor.into_report();

    report.log_summary("setup");
    if let Some(path) = &config.report_path {
        if let Err(e) = report.write_json(&config.root.join(path)) {
            warn!(target: "shim_testenv::setup", error = %e, "Failed to write provision report");
        }
    }

    if let Err(e) = result {
        error!(target: "shim_testenv::setup", error = %e, "Setup aborted");
        return Err(e);
    }

    info!(target: "shim_testenv::setup", ">>> cluster is ready");
    Ok(report)
}

async fn run_steps(config: &Config, executor: &mut StepExecutor<'_>) -> Result<()> {
    stager::stage_shims(config, executor).await?;

    for step in provision::plan(config) {
        executor.execute(&step).await?;
    }

    Ok(())
}
