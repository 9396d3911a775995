//! Stage collaborator traits and their command-backed implementations.
//!
//! The pipeline only talks to these traits; tests substitute recording
//! stubs. Matching is pure and lives in [`trigger`].

pub mod build;
pub mod provision;
pub mod publish;
pub mod test_gate;
pub mod trigger;

use crate::context::RunContext;
use crate::domain::{ArtifactSet, ExecutionEnvironment, ReleaseRecord, ReleaseRequest, TestResult};
use crate::error::{BuildError, ProvisioningError, PublishError};
use async_trait::async_trait;

pub use build::CommandPackageBuilder;
pub use provision::CommandProvisioner;
pub use publish::{FsReleasePublisher, GitHubConfig, GitHubReleasePublisher};
pub use test_gate::CommandTestGate;
pub use trigger::{AlwaysStable, ReleaseClassifier, SuffixPrerelease, TriggerMatcher};

/// Establishes the execution environment for a checked-out tree.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Returns a complete environment or an error; never a partial one.
    async fn provision(&self, ctx: &RunContext) -> Result<ExecutionEnvironment, ProvisioningError>;
}

/// Runs the project's test suite.
#[async_trait]
pub trait TestGate: Send + Sync {
    /// Runner crashes and empty suites are reported as failing results.
    async fn run_tests(&self, ctx: &RunContext, env: &ExecutionEnvironment) -> TestResult;
}

/// Produces the distributable artifacts.
#[async_trait]
pub trait PackageBuilder: Send + Sync {
    async fn build(
        &self,
        ctx: &RunContext,
        env: &ExecutionEnvironment,
    ) -> Result<ArtifactSet, BuildError>;
}

/// Creates the release on the hosting platform and uploads its assets.
#[async_trait]
pub trait ReleasePublisher: Send + Sync {
    async fn publish(&self, request: &ReleaseRequest) -> Result<ReleaseRecord, PublishError>;
}
