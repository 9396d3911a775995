//! Pipeline state machine.

use crate::error::Stage;
use serde::{Deserialize, Serialize};

/// Where a run currently is.
///
/// Transitions only move forward:
/// `Idle → Matching → Provisioning → Testing → Building → Publishing → Succeeded`.
/// `Matching` may end in `NoOp`; any working state may end in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Matching,
    Provisioning,
    Testing,
    Building,
    Publishing,
    Succeeded,
    /// Trigger did not match; succeeded without doing anything
    NoOp,
    Failed,
}

impl PipelineState {
    /// State entered when the current one completes successfully.
    ///
    /// Terminal states return themselves.
    pub fn next(&self) -> PipelineState {
        match self {
            PipelineState::Idle => PipelineState::Matching,
            PipelineState::Matching => PipelineState::Provisioning,
            PipelineState::Provisioning => PipelineState::Testing,
            PipelineState::Testing => PipelineState::Building,
            PipelineState::Building => PipelineState::Publishing,
            PipelineState::Publishing => PipelineState::Succeeded,
            terminal => *terminal,
        }
    }

    /// Stage executed while in this state.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Matching => Some(Stage::Matching),
            PipelineState::Provisioning => Some(Stage::Provisioning),
            PipelineState::Testing => Some(Stage::Testing),
            PipelineState::Building => Some(Stage::Building),
            PipelineState::Publishing => Some(Stage::Publishing),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Succeeded | PipelineState::NoOp | PipelineState::Failed
        )
    }

    /// Whether `to` is a legal successor of `self`.
    pub fn can_transition_to(&self, to: PipelineState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            PipelineState::Failed => *self != PipelineState::Idle,
            PipelineState::NoOp => *self == PipelineState::Matching,
            other => self.next() == other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Matching => "matching",
            PipelineState::Provisioning => "provisioning",
            PipelineState::Testing => "testing",
            PipelineState::Building => "building",
            PipelineState::Publishing => "publishing",
            PipelineState::Succeeded => "succeeded",
            PipelineState::NoOp => "no_op",
            PipelineState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
