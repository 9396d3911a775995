//! Command-backed package builder.

use super::PackageBuilder;
use crate::config::BuildConfig;
use crate::context::RunContext;
use crate::domain::{ArtifactKind, ArtifactSet, BuildArtifact, ExecutionEnvironment};
use crate::error::BuildError;
use crate::process::run_shell;
use async_trait::async_trait;
use tracing::{debug, info, warn};

const DIAGNOSTIC_LINES: usize = 20;

/// Runs the build command and collects every distribution file from the
/// context's output directory.
///
/// A build must yield at least one source archive and one binary
/// distribution; anything else in the directory is ignored.
pub struct CommandPackageBuilder {
    config: BuildConfig,
}

impl CommandPackageBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    async fn collect(&self, ctx: &RunContext) -> Result<ArtifactSet, BuildError> {
        let dir = ctx.output_dir();
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
            BuildError::toolchain_failure(format!("output directory {}: {e}", dir.display()))
        })?;

        let mut artifacts = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BuildError::toolchain_failure(e.to_string()))?
        {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(kind) = ArtifactKind::classify(&file_name) else {
                debug!(file = %file_name, "ignoring non-distribution file");
                continue;
            };
            let content = tokio::fs::read(entry.path())
                .await
                .map_err(|e| BuildError::toolchain_failure(format!("{file_name}: {e}")))?;
            artifacts.push(BuildArtifact::new(file_name, kind, content));
        }
        Ok(ArtifactSet::new(artifacts))
    }
}

#[async_trait]
impl PackageBuilder for CommandPackageBuilder {
    async fn build(
        &self,
        ctx: &RunContext,
        env: &ExecutionEnvironment,
    ) -> Result<ArtifactSet, BuildError> {
        if !env.manifest.has_build_metadata() {
            return Err(BuildError::invalid_metadata(
                "project manifest must declare a name and a version",
            ));
        }
        if let (Some(declared), Some(tag)) = (&env.manifest.version, &ctx.tag_version) {
            let tag_version = tag.to_string();
            if declared.as_str() != tag_version.trim_start_matches('v') {
                warn!(declared = %declared, tag = %tag_version, "manifest version differs from tag");
            }
        }

        let out = ctx.output_dir();
        if self.config.clean_output && out.exists() {
            debug!(dir = %out.display(), "cleaning output directory");
            tokio::fs::remove_dir_all(out)
                .await
                .map_err(|e| BuildError::toolchain_failure(format!("clean {}: {e}", out.display())))?;
        }

        let vars = ctx.command_env(&env.env_vars);
        let output = run_shell(&self.config.command, ctx.workdir(), &vars)
            .await
            .map_err(|e| BuildError::toolchain_failure(format!("'{}': {e}", self.config.command)))?;
        if !output.success() {
            return Err(BuildError::toolchain_failure(format!(
                "build exited with {:?}: {}",
                output.exit_code,
                output.tail(DIAGNOSTIC_LINES)
            )));
        }

        let artifacts = self.collect(ctx).await?;
        if !artifacts.has_kind(ArtifactKind::SourceArchive) {
            return Err(BuildError::toolchain_failure("build produced no source archive"));
        }
        if !artifacts.has_kind(ArtifactKind::BinaryDistribution) {
            return Err(BuildError::toolchain_failure(
                "build produced no binary distribution",
            ));
        }

        info!(
            artifacts = artifacts.len(),
            bytes = artifacts.total_size(),
            duration_ms = output.duration_ms,
            "package built"
        );
        Ok(artifacts)
    }
}
