//! Shim test environment harness.
//!
//! Brings up a disposable k3d cluster whose node image carries freshly built
//! containerd shims, loads the sample workloads into it, and tears it down
//! again. All cluster, image and build work is delegated to the `k3d`,
//! `docker`, `kubectl` and `cross` command-line tools.
//!
//! # Flow
//!
//! 1. [`preflight::check`]: every required tool resolves on `PATH`
//! 2. [`stager::stage_shims`]: build and copy shims that are not yet staged
//! 3. [`provision::plan`]: node image, cluster, node readiness, workload
//!    images, image import, manifests
//! 4. [`teardown::teardown`]: delete the cluster and the node image
//!
//! Steps run strictly one after another through a [`runner::CommandRunner`].

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod preflight;
pub mod provision;
pub mod report;
pub mod runner;
pub mod setup;
pub mod stager;
pub mod teardown;
pub mod workload;
