//! Shim staging.
//!
//! Copies each workload's shim binary into the node image build context so the
//! image bakes it in. Workloads sharing a runtime share one shim. A shim that
//! is already staged is never rebuilt or overwritten; delete it from the
//! staging directory to force a refresh.

use std::collections::HashSet;

use tracing::info;

use crate::config::{Config, StageMode};
use crate::error::Result;
use crate::executor::{Step, StepExecutor};
use crate::runner::Invocation;

/// Ensure the staging directory exists, then stage every missing shim.
pub async fn stage_shims(config: &Config, executor: &mut StepExecutor<'_>) -> Result<()> {
    executor
        .execute(&Step::ensure_dir(
            "create staging directory",
            &config.staging_dir,
        ))
        .await?;

    let mut seen = HashSet::new();
    for workload in &config.workloads {
        let shim = workload.shim_name();
        if !seen.insert(shim.clone()) {
            continue;
        }
        let staged = config.staging_dir.join(&shim);

        if config.root.join(&staged).exists() {
            executor.skip(&format!("stage {shim}"), "already staged");
            continue;
        }

        info!(
            target: "shim_testenv::stager",
            shim = %shim,
            target_triple = %config.target,
            "Installing {}",
            shim
        );

        if config.stage_mode == StageMode::Build {
            executor
                .execute(&Step::run(
                    format!("build {shim}"),
                    cross_build(config, &workload.shim_manifest().display().to_string()),
                ))
                .await?;
        }

        executor
            .execute(&Step::install_file(
                format!("stage {shim}"),
                workload.shim_build_output(&config.target),
                staged,
            ))
            .await?;
    }

    Ok(())
}

fn cross_build(config: &Config, manifest: &str) -> Invocation {
    Invocation::new("cross", &config.root).args([
        "build".to_string(),
        "--target".to_string(),
        config.target.clone(),
        "--release".to_string(),
        format!("--manifest-path={manifest}"),
        "-vvv".to_string(),
    ])
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::FailurePolicy;
    use crate::report::StepOutcome;
    use crate::runner::mock::RecordingRunner;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    fn config(root: &Path) -> Config {
        Config::from_vars(&HashMap::from([(
            "SHIM_TEST_ROOT".to_string(),
            root.display().to_string(),
        )]))
        .unwrap()
    }

    /// Lay down release binaries as if `cross build` had produced them.
    fn fake_build_outputs(config: &Config) {
        for workload in &config.workloads {
            let output = config
                .root
                .join(workload.shim_build_output(&config.target));
            fs::create_dir_all(output.parent().unwrap()).unwrap();
            fs::write(&output, format!("{} binary", workload.shim_name())).unwrap();
        }
    }

    #[tokio::test]
    async fn test_build_mode_builds_then_stages_each_shim() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        fake_build_outputs(&config);
        let runner = RecordingRunner::succeeding();
        let mut executor = StepExecutor::new(&runner, root.path(), FailurePolicy::Abort);

        stage_shims(&config, &mut executor).await.unwrap();

        assert_eq!(
            runner.command_lines(),
            vec![
                "cross build --target x86_64-unknown-linux-musl --release --manifest-path=containerd-shim-slight-v1/Cargo.toml -vvv",
                "cross build --target x86_64-unknown-linux-musl --release --manifest-path=containerd-shim-spin-v1/Cargo.toml -vvv",
            ]
        );
        let staged = root.path().join("deployments/k3d/.tmp");
        assert_eq!(
            fs::read_to_string(staged.join("containerd-shim-spin-v1")).unwrap(),
            "containerd-shim-spin-v1 binary"
        );
        assert!(staged.join("containerd-shim-slight-v1").is_file());
    }

    #[tokio::test]
    async fn test_staging_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        fake_build_outputs(&config);

        let first = RecordingRunner::succeeding();
        let mut executor = StepExecutor::new(&first, root.path(), FailurePolicy::Abort);
        stage_shims(&config, &mut executor).await.unwrap();

        // Mark a staged shim so an overwrite would be visible.
        let staged = root.path().join("deployments/k3d/.tmp/containerd-shim-slight-v1");
        fs::write(&staged, "hand-placed").unwrap();

        let second = RecordingRunner::succeeding();
        let mut executor = StepExecutor::new(&second, root.path(), FailurePolicy::Abort);
        stage_shims(&config, &mut executor).await.unwrap();

        assert!(second.invocations().is_empty());
        assert_eq!(fs::read_to_string(&staged).unwrap(), "hand-placed");
        let skipped = executor
            .report()
            .steps
            .iter()
            .filter(|r| r.outcome == StepOutcome::Skipped)
            .count();
        assert_eq!(skipped, 2);
    }

    #[tokio::test]
    async fn test_prebuilt_mode_never_invokes_cross() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config(root.path());
        config.stage_mode = StageMode::Prebuilt;
        fake_build_outputs(&config);
        let runner = RecordingRunner::succeeding();
        let mut executor = StepExecutor::new(&runner, root.path(), FailurePolicy::Abort);

        stage_shims(&config, &mut executor).await.unwrap();

        assert!(runner.invocations().is_empty());
        assert!(root
            .path()
            .join("deployments/k3d/.tmp/containerd-shim-spin-v1")
            .is_file());
    }

    #[tokio::test]
    async fn test_target_selects_build_output() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path()).with_target("aarch64-unknown-linux-musl");
        fake_build_outputs(&config);
        let runner = RecordingRunner::succeeding();
        let mut executor = StepExecutor::new(&runner, root.path(), FailurePolicy::Abort);

        stage_shims(&config, &mut executor).await.unwrap();

        assert!(runner
            .command_lines()
            .iter()
            .all(|line| line.contains("--target aarch64-unknown-linux-musl")));
    }

    #[tokio::test]
    async fn test_shared_runtime_builds_shim_once() {
        let root = tempfile::tempdir().unwrap();
        let mut config = config(root.path());
        config.workloads = vec![
            "spin".parse().unwrap(),
            "spin:spin-keyvalue".parse().unwrap(),
        ];
        fake_build_outputs(&config);
        let runner = RecordingRunner::succeeding();
        let mut executor = StepExecutor::new(&runner, root.path(), FailurePolicy::Abort);

        stage_shims(&config, &mut executor).await.unwrap();

        assert_eq!(runner.invocations().len(), 1);
        assert_eq!(executor.report().steps.len(), 3);
    }

    #[tokio::test]
    async fn test_failed_build_still_attempts_copy_under_continue() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let runner = RecordingRunner::failing();
        let mut executor = StepExecutor::new(&runner, root.path(), FailurePolicy::Continue);

        stage_shims(&config, &mut executor).await.unwrap();

        // Two builds and two copies, all failed; the staging directory step succeeded.
        let report = executor.into_report();
        assert_eq!(report.steps.len(), 5);
        assert_eq!(report.failure_count(), 4);
        assert!(root.path().join("deployments/k3d/.tmp").is_dir());
    }
}
