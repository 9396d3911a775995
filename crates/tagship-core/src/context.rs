//! Per-run context threaded through every stage.

use crate::domain::{
    ArtifactSet, ExecutionEnvironment, MismatchReason, ReleaseRecord, TagVersion, TestResult,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Everything a run owns: where it works, what it may pass to child
/// processes, and what each completed stage produced.
///
/// Stages read the working directory and variables from here instead of
/// the process cwd or environment, so concurrent runs never share state.
#[derive(Debug, Clone)]
pub struct RunContext {
    workdir: PathBuf,
    output_dir: PathBuf,
    env_vars: BTreeMap<String, String>,
    cancel: CancellationToken,

    /// Version parsed from the matched tag
    pub tag_version: Option<TagVersion>,
    /// Why matching ended the run as a no-op
    pub skip_reason: Option<MismatchReason>,
    /// Set once provisioning succeeds
    pub environment: Option<ExecutionEnvironment>,
    /// Set once the test gate ran
    pub test_result: Option<TestResult>,
    /// Set once the build succeeds
    pub artifacts: Option<ArtifactSet>,
    /// Set once the publisher created the release
    pub release: Option<ReleaseRecord>,
}

impl RunContext {
    /// Context rooted at a checked-out source tree. Build output goes to
    /// `<workdir>/dist` unless overridden.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        let workdir = workdir.into();
        Self {
            output_dir: workdir.join("dist"),
            workdir,
            env_vars: BTreeMap::new(),
            cancel: CancellationToken::new(),
            tag_version: None,
            skip_reason: None,
            environment: None,
            test_result: None,
            artifacts: None,
            release: None,
        }
    }

    /// Relative paths are resolved against the working directory.
    pub fn with_output_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.output_dir = self.resolve(dir);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Replace the cancellation token, e.g. with a child of a process-wide one.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env_vars
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve `path` against the working directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }

    /// Context variables with `overlay` (usually the provisioned
    /// environment's) layered on top.
    pub fn command_env(&self, overlay: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut vars = self.env_vars.clone();
        vars.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }
}
