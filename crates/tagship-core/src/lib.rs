//! tagship core library
//!
//! A tag push goes through matching, provisioning, the test gate,
//! packaging and publishing, in that order. The first failure ends the run.
//! Stage collaborators sit behind traits in [`stages`]; the
//! [`ReleasePipeline`] sequences them and records each run in a
//! `tagship_state::RunLedger`.

pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod obs;
pub mod pipeline;
pub mod process;
pub mod stages;
pub mod telemetry;

pub use config::{ConfigError, PipelineConfig, PublishBackend, CONFIG_FILE};
pub use context::RunContext;

pub use domain::{
    ArtifactKind, ArtifactSet, BuildArtifact, ExecutionEnvironment, MatchDecision,
    MismatchReason, PipelineState, RefKind, ReleaseFlags, ReleaseRecord, ReleaseRequest,
    TagVersion, TestResult, TriggerEvent,
};

pub use error::{
    BuildError, BuildErrorKind, PipelineError, ProvisioningError, ProvisioningErrorKind,
    PublishError, PublishErrorKind, Result, Stage, TestFailure, TestFailureReason,
};

pub use pipeline::{PipelineOutcome, PipelineStages, ReleasePipeline, StageTimeouts};

pub use stages::{
    AlwaysStable, CommandPackageBuilder, CommandProvisioner, CommandTestGate,
    FsReleasePublisher, GitHubConfig, GitHubReleasePublisher, PackageBuilder, Provisioner,
    ReleaseClassifier, ReleasePublisher, SuffixPrerelease, TestGate, TriggerMatcher,
};

pub use telemetry::init_tracing;
