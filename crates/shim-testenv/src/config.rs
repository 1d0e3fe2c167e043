//! Harness configuration.
//!
//! Configuration is loaded from `SHIM_TEST_*` environment variables. Every
//! value has a default matching the reference test environment, so an empty
//! environment yields a working configuration.

use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::workload::Workload;

/// Default cluster name.
pub const DEFAULT_CLUSTER_NAME: &str = "test-cluster";

/// Default node image tag built from the shim-enabled k3s Dockerfile.
pub const DEFAULT_NODE_IMAGE: &str = "k3d-shim-test";

/// Default build context for the node image.
pub const DEFAULT_NODE_IMAGE_CONTEXT: &str = "deployments/k3d";

/// Default staging directory for shim binaries (inside the node image context).
pub const DEFAULT_STAGING_DIR: &str = "deployments/k3d/.tmp";

/// Default Kubernetes API port exposed by k3d.
pub const DEFAULT_API_PORT: u16 = 6551;

/// Default host port mapped to the cluster load balancer.
pub const DEFAULT_LOAD_BALANCER_HOST_PORT: u16 = 8082;

/// Default load balancer port inside the cluster.
pub const DEFAULT_LOAD_BALANCER_CONTAINER_PORT: u16 = 80;

/// Default number of k3d agent nodes.
pub const DEFAULT_AGENTS: u32 = 2;

/// Default cross-compilation target for the shims.
pub const DEFAULT_TARGET: &str = "x86_64-unknown-linux-musl";

/// Default workload runtimes.
pub const DEFAULT_WORKLOADS: &[&str] = &["slight", "spin"];

/// Default directory of Kubernetes manifests applied after image import.
pub const DEFAULT_MANIFESTS_DIR: &str = "tests/workloads";

/// Default bound on the node readiness wait, in seconds.
pub const DEFAULT_NODE_READY_TIMEOUT_SECONDS: u64 = 120;

/// Default pause after importing images, in seconds.
pub const DEFAULT_IMPORT_SETTLE_SECONDS: u64 = 10;

/// Default pause after applying workloads, in seconds.
pub const DEFAULT_WORKLOAD_SETTLE_SECONDS: u64 = 30;

/// Tools that must resolve on `PATH` before anything runs.
pub const REQUIRED_TOOLS: &[&str] = &["k3d", "cross", "docker", "kubectl"];

/// Host-to-cluster port mapping for the k3d load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl PortMapping {
    /// Render as a k3d `-p` argument.
    pub fn to_k3d_arg(self) -> String {
        format!("{}:{}@loadbalancer", self.host, self.container)
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

impl FromStr for PortMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, container) = s
            .split_once(':')
            .ok_or_else(|| format!("expected HOST:CONTAINER, got '{s}'"))?;
        let host = host
            .parse()
            .map_err(|_| format!("invalid host port '{host}'"))?;
        let container = container
            .parse()
            .map_err(|_| format!("invalid container port '{container}'"))?;
        Ok(Self { host, container })
    }
}

/// How the harness decides workloads have started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadReadiness {
    /// Sleep for the settle duration without checking anything.
    Sleep,
    /// Bounded `kubectl wait` on pod readiness, using the settle duration as
    /// the timeout.
    Poll,
}

impl FromStr for WorkloadReadiness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sleep" => Ok(Self::Sleep),
            "poll" => Ok(Self::Poll),
            other => Err(format!("expected 'sleep' or 'poll', got '{other}'")),
        }
    }
}

/// What happens when an external command fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Record the failure and run the next step.
    Continue,
    /// Stop at the first failed step.
    Abort,
}

/// Where shim binaries come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMode {
    /// `cross build` each shim, then copy the release binary.
    Build,
    /// Copy an already-built release binary.
    Prebuilt,
}

impl FromStr for StageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(Self::Build),
            "prebuilt" => Ok(Self::Prebuilt),
            other => Err(format!("expected 'build' or 'prebuilt', got '{other}'")),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{other}'")),
        }
    }
}

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Repository root; all relative paths and command working directories
    /// resolve against it.
    pub root: PathBuf,

    /// k3d cluster name.
    pub cluster_name: String,

    /// Node image tag.
    pub node_image: String,

    /// Build context for the node image, relative to `root`.
    pub node_image_context: PathBuf,

    /// Directory shim binaries are staged into, relative to `root`.
    pub staging_dir: PathBuf,

    /// Kubernetes API port.
    pub api_port: u16,

    /// Load balancer port mapping.
    pub load_balancer: PortMapping,

    /// Number of agent nodes.
    pub agents: u32,

    /// Target triple for the shim binaries.
    pub target: String,

    /// Sample workloads, one per runtime shim.
    pub workloads: Vec<Workload>,

    /// Manifests directory applied with `kubectl apply -f`, relative to `root`.
    pub manifests_dir: PathBuf,

    /// Bound on the node readiness wait.
    pub node_ready_timeout: Duration,

    /// Pause after image import.
    pub import_settle: Duration,

    /// Pause (or poll bound) after applying workloads.
    pub workload_settle: Duration,

    pub workload_readiness: WorkloadReadiness,

    pub failure_policy: FailurePolicy,

    pub stage_mode: StageMode,

    /// Run `kubectl describe pods` at the end of provisioning.
    pub describe_pods: bool,

    /// Write the provision report as JSON to this path, relative to `root`.
    pub report_path: Option<PathBuf>,

    pub log_format: LogFormat,

    /// Executable search path used by the preflight resolver.
    pub search_path: Option<OsString>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            node_image: DEFAULT_NODE_IMAGE.to_string(),
            node_image_context: PathBuf::from(DEFAULT_NODE_IMAGE_CONTEXT),
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            api_port: DEFAULT_API_PORT,
            load_balancer: PortMapping {
                host: DEFAULT_LOAD_BALANCER_HOST_PORT,
                container: DEFAULT_LOAD_BALANCER_CONTAINER_PORT,
            },
            agents: DEFAULT_AGENTS,
            target: DEFAULT_TARGET.to_string(),
            workloads: DEFAULT_WORKLOADS.iter().map(|w| Workload::new(*w)).collect(),
            manifests_dir: PathBuf::from(DEFAULT_MANIFESTS_DIR),
            node_ready_timeout: Duration::from_secs(DEFAULT_NODE_READY_TIMEOUT_SECONDS),
            import_settle: Duration::from_secs(DEFAULT_IMPORT_SETTLE_SECONDS),
            workload_settle: Duration::from_secs(DEFAULT_WORKLOAD_SETTLE_SECONDS),
            workload_readiness: WorkloadReadiness::Sleep,
            failure_policy: FailurePolicy::Continue,
            stage_mode: StageMode::Build,
            describe_pods: false,
            report_path: None,
            log_format: LogFormat::Pretty,
            search_path: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Variables whose name or value is not valid UTF-8 are ignored; `PATH`
    /// is read as an `OsString` either way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_vars(&utf8_vars(env::vars_os()))?;
        config.search_path = env::var_os("PATH");
        Ok(config)
    }

    /// Configuration for teardown, which only needs the root and the two
    /// names it deletes.
    ///
    /// Never fails: every other setting keeps its default, whatever the
    /// environment holds.
    pub fn for_teardown(vars: &HashMap<String, String>) -> Self {
        Self {
            root: vars
                .get("SHIM_TEST_ROOT")
                .map_or_else(|| PathBuf::from("."), PathBuf::from),
            cluster_name: string_var(vars, "SHIM_TEST_CLUSTER_NAME", DEFAULT_CLUSTER_NAME),
            node_image: string_var(vars, "SHIM_TEST_NODE_IMAGE", DEFAULT_NODE_IMAGE),
            ..Self::default()
        }
    }

    /// [`Config::for_teardown`] over the process environment.
    pub fn for_teardown_from_env() -> Self {
        let mut config = Self::for_teardown(&utf8_vars(env::vars_os()));
        config.search_path = env::var_os("PATH");
        config
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// `PATH` is read from the map as well, so tests can point the preflight
    /// resolver at a fixture directory.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let root = vars
            .get("SHIM_TEST_ROOT")
            .map_or_else(|| PathBuf::from("."), PathBuf::from);

        let cluster_name = string_var(vars, "SHIM_TEST_CLUSTER_NAME", DEFAULT_CLUSTER_NAME);
        let node_image = string_var(vars, "SHIM_TEST_NODE_IMAGE", DEFAULT_NODE_IMAGE);
        let node_image_context = PathBuf::from(string_var(
            vars,
            "SHIM_TEST_NODE_IMAGE_CONTEXT",
            DEFAULT_NODE_IMAGE_CONTEXT,
        ));
        let staging_dir =
            PathBuf::from(string_var(vars, "SHIM_TEST_STAGING_DIR", DEFAULT_STAGING_DIR));
        let manifests_dir = PathBuf::from(string_var(
            vars,
            "SHIM_TEST_MANIFESTS_DIR",
            DEFAULT_MANIFESTS_DIR,
        ));
        let target = string_var(vars, "SHIM_TEST_TARGET", DEFAULT_TARGET);

        let api_port = parsed_var(vars, "SHIM_TEST_API_PORT", DEFAULT_API_PORT)?;
        let load_balancer = parsed_var(
            vars,
            "SHIM_TEST_LOAD_BALANCER",
            PortMapping {
                host: DEFAULT_LOAD_BALANCER_HOST_PORT,
                container: DEFAULT_LOAD_BALANCER_CONTAINER_PORT,
            },
        )?;
        let agents = parsed_var(vars, "SHIM_TEST_AGENTS", DEFAULT_AGENTS)?;

        let workloads = match vars.get("SHIM_TEST_WORKLOADS") {
            Some(list) => parse_workloads(list)?,
            None => Config::default().workloads,
        };

        let node_ready_timeout = Duration::from_secs(parsed_var(
            vars,
            "SHIM_TEST_NODE_READY_TIMEOUT_SECONDS",
            DEFAULT_NODE_READY_TIMEOUT_SECONDS,
        )?);
        let import_settle = Duration::from_secs(parsed_var(
            vars,
            "SHIM_TEST_IMPORT_SETTLE_SECONDS",
            DEFAULT_IMPORT_SETTLE_SECONDS,
        )?);
        let workload_settle = Duration::from_secs(parsed_var(
            vars,
            "SHIM_TEST_WORKLOAD_SETTLE_SECONDS",
            DEFAULT_WORKLOAD_SETTLE_SECONDS,
        )?);

        let workload_readiness = parsed_var(
            vars,
            "SHIM_TEST_WORKLOAD_READINESS",
            WorkloadReadiness::Sleep,
        )?;
        let failure_policy = if parsed_var(vars, "SHIM_TEST_FAIL_FAST", false)? {
            FailurePolicy::Abort
        } else {
            FailurePolicy::Continue
        };
        let stage_mode = parsed_var(vars, "SHIM_TEST_STAGE_MODE", StageMode::Build)?;
        let describe_pods = parsed_var(vars, "SHIM_TEST_DESCRIBE_PODS", false)?;
        let report_path = vars.get("SHIM_TEST_REPORT_PATH").map(PathBuf::from);
        let log_format = parsed_var(vars, "SHIM_TEST_LOG_FORMAT", LogFormat::Pretty)?;

        Ok(Config {
            root,
            cluster_name,
            node_image,
            node_image_context,
            staging_dir,
            api_port,
            load_balancer,
            agents,
            target,
            workloads,
            manifests_dir,
            node_ready_timeout,
            import_settle,
            workload_settle,
            workload_readiness,
            failure_policy,
            stage_mode,
            describe_pods,
            report_path,
            log_format,
            search_path: vars.get("PATH").map(OsString::from),
        })
    }

    /// Override the target triple (the `setup-test` positional argument).
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// kubectl context name k3d registers for the cluster.
    pub fn kube_context(&self) -> String {
        kube_context(&self.cluster_name)
    }
}

/// kubectl context name k3d registers for a cluster called `cluster_name`.
pub fn kube_context(cluster_name: &str) -> String {
    format!("k3d-{cluster_name}")
}

/// Keep the entries that are valid UTF-8 in both name and value.
fn utf8_vars<I>(vars: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

fn string_var(vars: &HashMap<String, String>, var: &str, default: &str) -> String {
    vars.get(var)
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

fn parsed_var<T>(vars: &HashMap<String, String>, var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: var.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_workloads(list: &str) -> Result<Vec<Workload>, ConfigError> {
    let workloads: Vec<Workload> = list
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse::<Workload>)
        .collect::<Result<Vec<_>, String>>()
        .map_err(|message| ConfigError::InvalidValue {
            var: "SHIM_TEST_WORKLOADS".to_string(),
            message,
        })?;

    if workloads.is_empty() {
        return Err(ConfigError::InvalidValue {
            var: "SHIM_TEST_WORKLOADS".to_string(),
            message: "at least one workload is required".to_string(),
        });
    }

    Ok(workloads)
}
