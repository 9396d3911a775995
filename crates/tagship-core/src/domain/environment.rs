//! Execution environment produced by the provisioner.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tagship_env::{DependencyManifest, EnvironmentHash};

/// A fully provisioned environment. Created fresh per run, never persisted.
///
/// Only a provisioner that completed every step hands one out, so later
/// stages never see a half-installed environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEnvironment {
    /// Runtime version that was requested (e.g. "3.11")
    pub requested_runtime: String,
    /// Runtime version the interpreter reported (e.g. "3.11.4")
    pub runtime_version: String,
    /// Declared direct dependencies
    pub manifest: DependencyManifest,
    /// Resolved package name → concrete version
    pub installed: BTreeMap<String, String>,
    /// Fingerprint over runtime version and lockfile
    pub fingerprint: EnvironmentHash,
    /// Variables every later command in this environment runs with
    pub env_vars: BTreeMap<String, String>,
}

