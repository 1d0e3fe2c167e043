//! Cluster connection and health check utilities.
//!
//! This module provides the `ClusterConnection` type for validating that the local
//! k3d cluster and its load balancer are available before running tests.

use std::net::TcpStream;
use std::time::Duration;

use std::process::Stdio;

use shim_testenv::config::{kube_context, DEFAULT_CLUSTER_NAME, DEFAULT_LOAD_BALANCER_HOST_PORT};
use thiserror::Error;
use tokio::process::{Child, Command};

/// Cluster connection errors.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Load balancer not reachable on localhost:{port}. Run 'setup-test' to provision the cluster")]
    IngressNotFound { port: u16 },

    #[error("Service health check failed: {message}")]
    HealthCheckFailed { message: String },

    #[error("kubectl failed: {message}")]
    Kubectl { message: String },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Where the test cluster is reachable from the host.
#[derive(Debug, Clone)]
pub struct ClusterTarget {
    /// Host port mapped to the k3d load balancer.
    pub ingress_port: u16,
    /// k3d cluster name; the kubectl context is `k3d-<name>`.
    pub cluster_name: String,
}

impl Default for ClusterTarget {
    fn default() -> Self {
        Self {
            ingress_port: DEFAULT_LOAD_BALANCER_HOST_PORT,
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
        }
    }
}

/// Connection to the local k3d cluster.
///
/// Provides the ingress base URL and pod inspection through kubectl.
pub struct ClusterConnection {
    pub ingress_base_url: String,
    pub kube_context: String,
    http_client: reqwest::Client,
}

impl ClusterConnection {
    /// Create a new cluster connection with the default target.
    ///
    /// Performs a TCP check on the load balancer port with a 5s timeout.
    pub async fn new() -> Result<Self, ClusterError> {
        Self::new_with_target(ClusterTarget::default()).await
    }

    /// Create a new cluster connection for a custom target.
    pub async fn new_with_target(target: ClusterTarget) -> Result<Self, ClusterError> {
        Self::check_tcp_port(target.ingress_port)?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClusterError::HealthCheckFailed {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            ingress_base_url: format!("http://localhost:{}", target.ingress_port),
            kube_context: kube_context(&target.cluster_name),
            http_client,
        })
    }

    /// Check if a TCP port is reachable on localhost.
    ///
    /// Uses a 5 second timeout for the connection attempt.
    fn check_tcp_port(port: u16) -> Result<(), ClusterError> {
        let addr = format!("127.0.0.1:{}", port);

        TcpStream::connect_timeout(
            &addr.parse().map_err(|_| ClusterError::HealthCheckFailed {
                message: format!("Invalid address: {}", addr),
            })?,
            Duration::from_secs(5),
        )
        .map_err(|_| ClusterError::IngressNotFound { port })?;

        Ok(())
    }

    /// Get the HTTP client for making requests.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    /// URL for a path behind the load balancer.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.ingress_base_url, path)
    }

    /// List pod names in the default namespace of the cluster's context.
    pub async fn list_pods(&self) -> Result<Vec<String>, ClusterError> {
        let output = Command::new("kubectl")
            .args([
                "--context",
                self.kube_context.as_str(),
                "get",
                "pods",
                "-o",
                "jsonpath={.items[*].metadata.name}",
            ])
            .output()
            .await
            .map_err(|e| ClusterError::Kubectl {
                message: format!("kubectl not available: {}", e),
            })?;

        if !output.status.success() {
            return Err(ClusterError::Kubectl {
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let pods = parse_pod_names(&String::from_utf8_lossy(&output.stdout));
        for pod in &pods {
            tracing::info!(pod = %pod, "found pod");
        }
        Ok(pods)
    }
}

/// A running `kubectl port-forward`. The forward stops when this is dropped.
pub struct PortForward {
    _child: Child,
}

impl ClusterConnection {
    /// Forward `local_port` on localhost to `remote_port` of `pod`.
    ///
    /// Waits two seconds for kubectl to open the local listener.
    pub async fn port_forward(
        &self,
        pod: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<PortForward, ClusterError> {
        tracing::info!(pod = %pod, local_port, remote_port, "kubectl port-forward");
        let mapping = format!("{local_port}:{remote_port}");
        let child = Command::new("kubectl")
            .args([
                "--context",
                self.kube_context.as_str(),
                "port-forward",
                pod,
                mapping.as_str(),
            ])
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClusterError::Kubectl {
                message: format!("kubectl not available: {}", e),
            })?;

        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(PortForward { _child: child })
    }
}

/// Whether a kubectl client is installed (`kubectl version --client`).
pub async fn kubectl_available() -> bool {
    Command::new("kubectl")
        .args(["version", "--client"])
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

fn parse_pod_names(jsonpath_output: &str) -> Vec<String> {
    jsonpath_output
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
