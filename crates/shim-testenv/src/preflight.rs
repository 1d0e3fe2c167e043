//! Preflight checks.
//!
//! Runs before anything touches the filesystem or the docker daemon. Either
//! every dependency resolves or the run stops with
//! [`HarnessError::MissingDependency`].

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::{Config, StageMode, REQUIRED_TOOLS};
use crate::error::{HarnessError, Result};

/// A required tool and where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
    pub name: String,
    pub path: PathBuf,
}

/// Resolve `name` against the directories of `search_path`.
///
/// Returns the first candidate that is an executable regular file.
pub fn which(name: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let search_path = search_path?;
    env::split_paths(search_path)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Resolve every tool in `tools`, in order.
///
/// Fails on the first tool that cannot be found.
pub fn resolve_tools(tools: &[&str], search_path: Option<&OsStr>) -> Result<Vec<ResolvedTool>> {
    tools
        .iter()
        .map(|name| {
            let path = which(name, search_path).ok_or_else(|| HarnessError::MissingDependency {
                name: (*name).to_string(),
            })?;
            debug!(target: "shim_testenv::preflight", tool = %name, path = %path.display(), "Resolved tool");
            Ok(ResolvedTool {
                name: (*name).to_string(),
                path,
            })
        })
        .collect()
}

/// Run all preflight checks for a provisioning run.
///
/// In prebuilt staging mode, each shim that is not already staged must exist
/// at its release output path; a missing one is a missing dependency.
pub fn check(config: &Config) -> Result<Vec<ResolvedTool>> {
    let tools = resolve_tools(REQUIRED_TOOLS, config.search_path.as_deref())?;

    if config.stage_mode == StageMode::Prebuilt {
        let staging_dir = config.root.join(&config.staging_dir);
        for workload in &config.workloads {
            if staging_dir.join(workload.shim_name()).exists() {
                continue;
            }
            let source = workload.shim_build_output(&config.target);
            if !config.root.join(&source).is_file() {
                return Err(HarnessError::MissingDependency {
                    name: source.display().to_string(),
                });
            }
        }
    }

    info!(
        target: "shim_testenv::preflight",
        tools = tools.len(),
        "Preflight checks passed"
    );
    Ok(tools)
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::ffi::OsString;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn fake_tool(dir: &Path, name: &str) {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn config_with_path(root: &Path, bin: &Path) -> Config {
        Config::from_vars(&HashMap::from([
            ("SHIM_TEST_ROOT".to_string(), root.display().to_string()),
            ("PATH".to_string(), bin.display().to_string()),
        ]))
        .unwrap()
    }

    #[test]
    fn test_which_finds_executable_in_later_dir() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fake_tool(second.path(), "k3d");

        let search = env::join_paths([first.path(), second.path()]).unwrap();
        let found = which("k3d", Some(search.as_os_str())).expect("k3d should resolve");
        assert_eq!(found, second.path().join("k3d"));
    }

    #[test]
    fn test_which_skips_non_executable_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docker");
        fs::write(&path, "not a program").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        assert!(which("docker", Some(dir.path().as_os_str())).is_none());
    }

    #[test]
    fn test_which_without_search_path() {
        assert!(which("k3d", None).is_none());
    }

    #[test]
    fn test_resolve_tools_reports_first_missing() {
        let dir = tempfile::tempdir().unwrap();
        fake_tool(dir.path(), "k3d");
        fake_tool(dir.path(), "kubectl");

        let search = OsString::from(dir.path());
        let err = resolve_tools(REQUIRED_TOOLS, Some(search.as_os_str())).unwrap_err();
        match err {
            HarnessError::MissingDependency { name } => assert_eq!(name, "cross"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_check_passes_with_all_tools() {
        let root = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        for tool in REQUIRED_TOOLS {
            fake_tool(bin.path(), tool);
        }

        let tools = check(&config_with_path(root.path(), bin.path())).unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["k3d", "cross", "docker", "kubectl"]);
    }

    #[test]
    fn test_check_prebuilt_requires_release_binaries() {
        let root = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        for tool in REQUIRED_TOOLS {
            fake_tool(bin.path(), tool);
        }
        let mut config = config_with_path(root.path(), bin.path());
        config.stage_mode = StageMode::Prebuilt;

        let err = check(&config).unwrap_err();
        match err {
            HarnessError::MissingDependency { name } => {
                assert!(name.ends_with("release/containerd-shim-slight-v1"), "{name}");
            }
            other => panic!("unexpected error: {other}"),
        }

        // A shim that is already staged does not need a release binary.
        let staging = root.path().join(&config.staging_dir);
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("containerd-shim-slight-v1"), "bin").unwrap();
        let spin_out = root
            .path()
            .join("containerd-shim-spin-v1/target/x86_64-unknown-linux-musl/release");
        fs::create_dir_all(&spin_out).unwrap();
        fs::write(spin_out.join("containerd-shim-spin-v1"), "bin").unwrap();

        assert!(check(&config).is_ok());
    }
}
