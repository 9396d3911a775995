//! Command-backed environment provisioner.

use super::Provisioner;
use crate::config::EnvironmentConfig;
use crate::context::RunContext;
use crate::domain::ExecutionEnvironment;
use crate::error::ProvisioningError;
use crate::process::run_shell;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tagship_env::{fingerprint_files, DependencyManifest, Lockfile};
use tracing::{debug, info, warn};

const DIAGNOSTIC_LINES: usize = 20;

/// Provisions in three steps: check the runtime, install the dependency
/// manager when it is missing, then resolve the manifest's dependencies.
pub struct CommandProvisioner {
    config: EnvironmentConfig,
}

impl CommandProvisioner {
    pub fn new(config: EnvironmentConfig) -> Self {
        Self { config }
    }

    async fn select_runtime(
        &self,
        ctx: &RunContext,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, ProvisioningError> {
        let probe = format!("{} --version", self.config.runtime);
        let output = run_shell(&probe, ctx.workdir(), vars).await.map_err(|e| {
            ProvisioningError::runtime_unavailable(format!("{}: {e}", self.config.runtime))
        })?;
        if !output.success() {
            return Err(ProvisioningError::runtime_unavailable(format!(
                "{} --version exited with {:?}: {}",
                self.config.runtime,
                output.exit_code,
                output.tail(DIAGNOSTIC_LINES)
            )));
        }

        // Older interpreters print their version on stderr.
        let reported = parse_runtime_version(&output.stdout)
            .or_else(|| parse_runtime_version(&output.stderr))
            .ok_or_else(|| {
                ProvisioningError::runtime_unavailable(format!(
                    "could not read a version from '{}'",
                    output.stdout.trim()
                ))
            })?;

        if let Some(requested) = &self.config.runtime_version {
            if !version_satisfies(&reported, requested) {
                return Err(ProvisioningError::runtime_unavailable(format!(
                    "requested runtime {requested}, found {reported}"
                )));
            }
        }
        debug!(runtime = %self.config.runtime, version = %reported, "runtime selected");
        Ok(reported)
    }

    async fn install_tool(
        &self,
        ctx: &RunContext,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), ProvisioningError> {
        if let Some(check) = &self.config.tool_check_command {
            if let Ok(output) = run_shell(check, ctx.workdir(), vars).await {
                if output.success() {
                    debug!(check = %check, "dependency manager already installed");
                    return Ok(());
                }
            }
        }

        info!(installer = %self.config.installer_command, "installing dependency manager");
        let output = run_shell(&self.config.installer_command, ctx.workdir(), vars)
            .await
            .map_err(|e| ProvisioningError::tool_install_failed(e.to_string()))?;
        if !output.success() {
            return Err(ProvisioningError::tool_install_failed(format!(
                "installer exited with {:?}: {}",
                output.exit_code,
                output.tail(DIAGNOSTIC_LINES)
            )));
        }
        Ok(())
    }

    async fn resolve(
        &self,
        ctx: &RunContext,
        vars: &BTreeMap<String, String>,
    ) -> Result<(), ProvisioningError> {
        let output = run_shell(&self.config.resolve_command, ctx.workdir(), vars)
            .await
            .map_err(|e| ProvisioningError::resolution_conflict(e.to_string()))?;
        if !output.success() {
            return Err(ProvisioningError::resolution_conflict(format!(
                "dependency resolution exited with {:?}: {}",
                output.exit_code,
                output.tail(DIAGNOSTIC_LINES)
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn provision(&self, ctx: &RunContext) -> Result<ExecutionEnvironment, ProvisioningError> {
        let vars = ctx.command_env(&BTreeMap::new());
        let manifest_path = ctx.resolve(&self.config.manifest);
        let lockfile_path = ctx.resolve(&self.config.lockfile);

        let runtime_version = self.select_runtime(ctx, &vars).await?;
        self.install_tool(ctx, &vars).await?;

        let manifest = DependencyManifest::load(&manifest_path)
            .map_err(|e| ProvisioningError::resolution_conflict(e.to_string()))?;
        if self.config.require_lockfile && !lockfile_path.exists() {
            return Err(ProvisioningError::resolution_conflict(format!(
                "lockfile {} is required but missing",
                lockfile_path.display()
            )));
        }
        self.resolve(ctx, &vars).await?;

        // Resolution may have written the lockfile.
        let installed = if lockfile_path.exists() {
            let lockfile = Lockfile::load(&lockfile_path)
                .map_err(|e| ProvisioningError::resolution_conflict(e.to_string()))?;
            let unpinned = lockfile.unpinned(&manifest);
            if !unpinned.is_empty() {
                return Err(ProvisioningError::resolution_conflict(format!(
                    "lockfile does not pin: {}",
                    unpinned.join(", ")
                )));
            }
            lockfile.installed_set()
        } else {
            warn!(path = %lockfile_path.display(), "no lockfile after resolution; installed set unknown");
            BTreeMap::new()
        };

        let fingerprint = fingerprint_files(&runtime_version, &manifest_path, &lockfile_path)
            .map_err(|e| ProvisioningError::resolution_conflict(e.to_string()))?;

        let mut env_vars = BTreeMap::new();
        env_vars.insert("TAGSHIP_RUNTIME_VERSION".to_string(), runtime_version.clone());
        env_vars.insert("TAGSHIP_ENV_HASH".to_string(), fingerprint.hash.clone());

        info!(
            runtime = %runtime_version,
            packages = installed.len(),
            fingerprint = %fingerprint.short(),
            "environment provisioned"
        );

        Ok(ExecutionEnvironment {
            requested_runtime: self
                .config
                .runtime_version
                .clone()
                .unwrap_or_else(|| self.config.runtime.clone()),
            runtime_version,
            manifest,
            installed,
            fingerprint,
            env_vars,
        })
    }
}

/// First whitespace-separated token that starts with a digit:
/// `Python 3.11.4` → `3.11.4`.
fn parse_runtime_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .find(|t| t.starts_with(|c: char| c.is_ascii_digit()))
        .map(str::to_string)
}

/// `3.11.4` satisfies `3.11` and `3.11.4`, not `3.1`.
fn version_satisfies(reported: &str, requested: &str) -> bool {
    let requested = requested.trim();
    reported == requested
        || reported
            .strip_prefix(requested)
            .is_some_and(|rest| rest.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_version_is_read_from_banner() {
        assert_eq!(parse_runtime_version("Python 3.11.4\n").as_deref(), Some("3.11.4"));
        assert_eq!(parse_runtime_version("3.12.0").as_deref(), Some("3.12.0"));
        assert_eq!(parse_runtime_version("Python"), None);
    }

    #[test]
    fn version_prefix_matching() {
        assert!(version_satisfies("3.11.4", "3.11"));
        assert!(version_satisfies("3.11.4", "3.11.4"));
        assert!(!version_satisfies("3.11.4", "3.1"));
        assert!(!version_satisfies("3.10.2", "3.11"));
    }
}
