//! Cluster provisioning plan.
//!
//! The plan is a fixed sequence derived entirely from [`Config`]. Node
//! readiness is the one step with a real condition check; the pauses after
//! image import and after applying workloads are blind sleeps unless
//! `WorkloadReadiness::Poll` is configured.

use crate::config::{Config, WorkloadReadiness};
use crate::executor::{Step, WAIT_GRACE};
use crate::runner::Invocation;

/// Build the provisioning steps, in execution order.
pub fn plan(config: &Config) -> Vec<Step> {
    let root = &config.root;
    let mut steps = Vec::new();

    steps.push(Step::run(
        "build node image",
        Invocation::new("docker", root).args([
            "build".to_string(),
            "-t".to_string(),
            config.node_image.clone(),
            config.node_image_context.display().to_string(),
        ]),
    ));

    steps.push(Step::run(
        "create cluster",
        Invocation::new("k3d", root).args([
            "cluster".to_string(),
            "create".to_string(),
            config.cluster_name.clone(),
            "--image".to_string(),
            config.node_image.clone(),
            "--api-port".to_string(),
            config.api_port.to_string(),
            "-p".to_string(),
            config.load_balancer.to_k3d_arg(),
            "--agents".to_string(),
            config.agents.to_string(),
        ]),
    ));

    steps.push(kubectl_wait(
        "wait for nodes",
        config,
        "node",
        config.node_ready_timeout.as_secs(),
    ));

    for workload in &config.workloads {
        steps.push(Step::run(
            format!("build {} image", workload.image()),
            Invocation::new("docker", root).args([
                "buildx".to_string(),
                "build".to_string(),
                "-t".to_string(),
                workload.image_tag(),
                workload.build_context(),
                "--load".to_string(),
            ]),
        ));
    }

    for workload in &config.workloads {
        steps.push(Step::ensure_dir(
            format!("create {} output directory", workload.image()),
            workload.output_dir(),
        ));
    }

    for workload in &config.workloads {
        steps.push(Step::run(
            format!("export {} image", workload.image()),
            Invocation::new("docker", root).args([
                "save".to_string(),
                "-o".to_string(),
                workload.archive_path().display().to_string(),
                workload.image_tag(),
            ]),
        ));
    }

    for workload in &config.workloads {
        steps.push(Step::run(
            format!("import {} image", workload.image()),
            Invocation::new("k3d", root).args([
                "image".to_string(),
                "import".to_string(),
                workload.archive_path().display().to_string(),
                "-c".to_string(),
                config.cluster_name.clone(),
            ]),
        ));
    }

    steps.push(Step::sleep("settle after image import", config.import_settle));

    steps.push(Step::run(
        "apply workloads",
        Invocation::new("kubectl", root).args([
            "apply".to_string(),
            "-f".to_string(),
            config.manifests_dir.display().to_string(),
        ]),
    ));

    steps.push(match config.workload_readiness {
        WorkloadReadiness::Sleep => Step::sleep("settle after apply", config.workload_settle),
        WorkloadReadiness::Poll => kubectl_wait(
            "wait for pods",
            config,
            "pod",
            config.workload_settle.as_secs(),
        ),
    });

    if config.describe_pods {
        steps.push(Step::run(
            "describe pods",
            Invocation::new("kubectl", root).args(["describe", "pods"]),
        ));
    }

    steps
}

/// `kubectl wait` on `kind` readiness, bounded both by kubectl's own timeout
/// and by the harness deadline.
fn kubectl_wait(label: &str, config: &Config, kind: &str, timeout_secs: u64) -> Step {
    let invocation = Invocation::new("kubectl", &config.root).args([
        "wait".to_string(),
        "--for=condition=ready".to_string(),
        kind.to_string(),
        "--all".to_string(),
        format!("--timeout={timeout_secs}s"),
    ]);
    let deadline = std::time::Duration::from_secs(timeout_secs) + WAIT_GRACE;
    Step::bounded(label, invocation, deadline)
}
