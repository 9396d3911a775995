//! Error types for tagship-state

use thiserror::Error;

/// Errors returned by `RunLedger` backends
#[derive(Error, Debug)]
pub enum StorageError {
    /// Run id unknown to the ledger
    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Operation not allowed in the run's current status
    #[error("Run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },

    /// Event sequence number did not advance
    #[error("Event seq {seq} for run {run_id} must be greater than {last}")]
    OutOfOrderEvent { run_id: String, seq: u64, last: u64 },

    /// `finish_run` called with `Running`
    #[error("Cannot finish a run with non-terminal status {status}")]
    NonTerminalStatus { status: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
