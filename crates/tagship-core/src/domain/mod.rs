//! Domain types of a release run.

pub mod artifact;
pub mod environment;
pub mod release;
pub mod state;
pub mod test_result;
pub mod trigger;

pub use artifact::{ArtifactKind, ArtifactSet, BuildArtifact};
pub use environment::ExecutionEnvironment;
pub use release::{ReleaseFlags, ReleaseRecord, ReleaseRequest};
pub use state::PipelineState;
pub use test_result::{TestResult, TestSummary};
pub use trigger::{MatchDecision, MismatchReason, RefKind, TagVersion, TriggerEvent};
