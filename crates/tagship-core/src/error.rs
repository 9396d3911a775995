//! Error taxonomy for pipeline runs.
//!
//! Every stage has its own error type carrying a machine-readable kind. A
//! trigger mismatch is not an error: it ends the run as a no-op.
//! [`PipelineError`] wraps the stage errors and maps each to the process
//! exit code the run reports.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The stages a run moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Matching,
    Provisioning,
    Testing,
    Building,
    Publishing,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Matching => "matching",
            Stage::Provisioning => "provisioning",
            Stage::Testing => "testing",
            Stage::Building => "building",
            Stage::Publishing => "publishing",
        }
    }

    /// Exit code a failure in this stage maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Stage::Matching => 0,
            Stage::Provisioning => 1,
            Stage::Testing => 2,
            Stage::Building => 3,
            Stage::Publishing => 4,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Provisioning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningErrorKind {
    /// Requested runtime version is not installed / not selectable
    RuntimeUnavailable,
    /// Dependency-manager installer unreachable or exited non-zero
    ToolInstallFailed,
    /// Manifest constraints could not be resolved and installed
    ResolutionConflict,
}

impl std::fmt::Display for ProvisioningErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RuntimeUnavailable => "runtime_unavailable",
            Self::ToolInstallFailed => "tool_install_failed",
            Self::ResolutionConflict => "resolution_conflict",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("provisioning failed ({kind}): {message}")]
pub struct ProvisioningError {
    pub kind: ProvisioningErrorKind,
    pub message: String,
}

impl ProvisioningError {
    pub fn new(kind: ProvisioningErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn runtime_unavailable(message: impl Into<String>) -> Self {
        Self::new(ProvisioningErrorKind::RuntimeUnavailable, message)
    }

    pub fn tool_install_failed(message: impl Into<String>) -> Self {
        Self::new(ProvisioningErrorKind::ToolInstallFailed, message)
    }

    pub fn resolution_conflict(message: impl Into<String>) -> Self {
        Self::new(ProvisioningErrorKind::ResolutionConflict, message)
    }
}

// ---------------------------------------------------------------------------
// Test gate
// ---------------------------------------------------------------------------

/// Why the test gate refused to pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestFailureReason {
    /// Runner reported failing tests
    FailingTests,
    /// Runner could not be started or was killed
    RunnerCrashed,
    /// Runner discovered no tests and empty suites are not allowed
    NoTestsCollected,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("test gate failed ({reason:?}): {count} failure(s)")]
pub struct TestFailure {
    pub count: u32,
    pub reason: TestFailureReason,
    pub diagnostics: Option<String>,
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildErrorKind {
    /// Project metadata missing or unusable
    InvalidMetadata,
    /// Build command failed or produced an incomplete distribution set
    ToolchainFailure,
}

impl std::fmt::Display for BuildErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidMetadata => "invalid_metadata",
            Self::ToolchainFailure => "toolchain_failure",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("build failed ({kind}): {message}")]
pub struct BuildError {
    pub kind: BuildErrorKind,
    pub message: String,
}

impl BuildError {
    pub fn invalid_metadata(message: impl Into<String>) -> Self {
        Self {
            kind: BuildErrorKind::InvalidMetadata,
            message: message.into(),
        }
    }

    pub fn toolchain_failure(message: impl Into<String>) -> Self {
        Self {
            kind: BuildErrorKind::ToolchainFailure,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishErrorKind {
    /// Authentication or permission denied
    Forbidden,
    /// The tag already has a release
    DuplicateRelease,
    /// Network or platform unavailable
    Unavailable,
}

impl std::fmt::Display for PublishErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Forbidden => "forbidden",
            Self::DuplicateRelease => "duplicate_release",
            Self::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("publish failed ({kind}): {message}")]
pub struct PublishError {
    pub kind: PublishErrorKind,
    pub message: String,
    /// Release created on the platform before the failure, if any
    pub release_id: Option<String>,
    /// Assets uploaded before the failure
    pub uploaded: Vec<String>,
}

impl PublishError {
    pub fn new(kind: PublishErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            release_id: None,
            uploaded: Vec::new(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Forbidden, message)
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::DuplicateRelease, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(PublishErrorKind::Unavailable, message)
    }

    /// Attach the partial progress made before the failure.
    pub fn with_progress(mut self, release_id: Option<String>, uploaded: Vec<String>) -> Self {
        self.release_id = release_id;
        self.uploaded = uploaded;
        self
    }

    /// Whether a release record was left behind on the platform.
    pub fn is_partial(&self) -> bool {
        self.release_id.is_some() || !self.uploaded.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Fatal error of a pipeline run. Nothing is retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Test(#[from] TestFailure),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("{stage} timed out after {timeout_secs}s")]
    TimedOut { stage: Stage, timeout_secs: u64 },

    #[error("run cancelled during {stage}")]
    Cancelled { stage: Stage },

    /// A stage was entered without the output of the stage before it.
    #[error("{stage} cannot start: {message}")]
    Precondition { stage: Stage, message: String },
}

impl PipelineError {
    /// Stage the error ended the run in.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Provisioning(_) => Stage::Provisioning,
            PipelineError::Test(_) => Stage::Testing,
            PipelineError::Build(_) => Stage::Building,
            PipelineError::Publish(_) => Stage::Publishing,
            PipelineError::TimedOut { stage, .. }
            | PipelineError::Cancelled { stage }
            | PipelineError::Precondition { stage, .. } => *stage,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        self.stage().exit_code()
    }

    /// Short machine-readable kind, recorded in the run ledger.
    pub fn kind(&self) -> String {
        match self {
            PipelineError::Provisioning(e) => e.kind.to_string(),
            PipelineError::Test(_) => "test_failure".to_string(),
            PipelineError::Build(e) => e.kind.to_string(),
            PipelineError::Publish(e) => e.kind.to_string(),
            PipelineError::TimedOut { .. } => "timed_out".to_string(),
            PipelineError::Cancelled { .. } => "cancelled".to_string(),
            PipelineError::Precondition { .. } => "precondition".to_string(),
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
