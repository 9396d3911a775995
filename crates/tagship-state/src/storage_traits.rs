//! Storage trait definitions for tagship
//!
//! `RunLedger` persists the externally visible record of a pipeline run:
//! the trigger it was started for, the ordered stage events, and the final
//! summary with the run's exit code.
//!
//! The trait is async and backend-agnostic. An in-memory fake lives in the
//! `fakes` module, a JSON-file backend in `fs_ledger`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }

    /// Short form (first 8 chars), used in log lines.
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata attached to a run at creation time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    /// Ref name of the triggering event (e.g. "v1.2.3")
    pub ref_name: String,
    /// Ref kind of the triggering event ("tag" or "branch")
    pub ref_kind: String,
    /// Digest of the effective pipeline configuration
    pub config_digest: String,
    /// Arbitrary key-value tags
    pub tags: serde_json::Value,
}

/// A single event in a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunEvent {
    /// Monotonic sequence number within the run
    pub seq: u64,
    /// Event kind (e.g. "stage_started", "stage_failed")
    pub kind: String,
    /// Event payload
    pub payload: serde_json::Value,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    /// Build an event stamped with the current time.
    pub fn now(seq: u64, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            seq,
            kind: kind.into(),
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Summary produced when a run reaches a terminal state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// Name of the final pipeline state (e.g. "succeeded", "failed")
    pub final_state: String,
    /// Process exit code the run maps to
    pub exit_code: i32,
    /// Total events recorded
    pub total_events: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
    /// Error message when the run failed
    pub error: Option<String>,
    /// Release identifier on the hosting platform, when one was created
    pub release_id: Option<String>,
}

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Release published.
    Succeeded,
    /// Trigger did not match; nothing ran.
    Skipped,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Whether no further events may be appended.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Skipped => "skipped",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Full run record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: RunId,
    pub metadata: RunMetadata,
    pub status: RunStatus,
    pub summary: Option<RunSummary>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Pipeline run ledger.
///
/// Guarantees:
/// - Events are strictly ordered by `seq` within a run; an event whose
///   `seq` does not exceed the last recorded one is rejected.
/// - A run transitions: Running → Succeeded | Skipped | Failed | Cancelled
///   (terminal).
/// - Finished runs are immutable.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Create a new run, returning its unique ID.
    async fn create_run(&self, metadata: RunMetadata) -> StorageResult<RunId>;

    /// Append an event to an active run. Fails if the run is finished.
    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()>;

    /// Move a running run into a terminal `status` with a summary.
    async fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        summary: RunSummary,
    ) -> StorageResult<()>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Retrieve all events for a run, ordered by seq.
    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>>;

    /// List runs, newest first, optionally truncated to `limit`.
    async fn list_runs(&self, limit: Option<usize>) -> StorageResult<Vec<RunRecord>>;
}

/// Shared transition checks used by every backend.
pub(crate) fn check_append(
    run_id: &RunId,
    record: &RunRecord,
    last_seq: Option<u64>,
    event: &RunEvent,
) -> StorageResult<()> {
    if record.status.is_terminal() {
        return Err(StorageError::InvalidRunState {
            run_id: run_id.0.clone(),
            status: record.status.to_string(),
            expected: RunStatus::Running.to_string(),
        });
    }
    if let Some(last) = last_seq {
        if event.seq <= last {
            return Err(StorageError::OutOfOrderEvent {
                run_id: run_id.0.clone(),
                seq: event.seq,
                last,
            });
        }
    }
    Ok(())
}

pub(crate) fn check_finish(
    run_id: &RunId,
    record: &RunRecord,
    status: RunStatus,
) -> StorageResult<()> {
    if !status.is_terminal() {
        return Err(StorageError::NonTerminalStatus {
            status: status.to_string(),
        });
    }
    if record.status.is_terminal() {
        return Err(StorageError::InvalidRunState {
            run_id: run_id.0.clone(),
            status: record.status.to_string(),
            expected: RunStatus::Running.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn new_record(metadata: RunMetadata) -> RunRecord {
    RunRecord {
        run_id: RunId::new(),
        metadata,
        status: RunStatus::Running,
        summary: None,
        created_at: Utc::now(),
        completed_at: None,
    }
}

pub(crate) fn sort_newest_first(records: &mut Vec<RunRecord>, limit: Option<usize>) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if let Some(limit) = limit {
        records.truncate(limit);
    }
}
