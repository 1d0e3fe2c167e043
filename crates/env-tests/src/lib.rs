//! Shim Environment Integration Test Suite
//!
//! Tests run against the cluster brought up by `setup-test` and check that
//! every staged shim actually serves its sample workload through the k3d load
//! balancer.
//!
//! # Features
//!
//! - `smoke`: ingress port reachable, pods listable
//! - `workloads`: per-shim HTTP checks (slight, spin, wws, lunatic, keyvalue)
//! - `all`: Enable all test categories
//!
//! # Prerequisites
//!
//! 1. Cluster running: `cargo run -p shim-testenv --bin setup-test`
//! 2. kubectl in PATH with the `k3d-test-cluster` context
//!
//! # Usage
//!
//! ```bash
//! # From repo root - runs 0 env-tests (no default features)
//! cargo test
//!
//! # Smoke tests only
//! cargo test -p env-tests --features smoke
//!
//! # Full suite
//! cargo test -p env-tests --features all
//! ```

pub mod cluster;
pub mod payload;
pub mod retry;
