//! tagship-state: run ledger persistence
//!
//! Every pipeline run leaves a record here: the trigger it was started for,
//! the ordered stage events, and the terminal summary. This is the run's
//! externally visible status; nothing a stage reports is dropped on the floor.
//!
//! ## Key Components
//!
//! - `RunLedger`: async, backend-agnostic persistence trait
//! - `MemoryRunLedger`: in-memory fake for tests
//! - `FsRunLedger`: one JSON document per run, written atomically

mod error;
pub mod fakes;
pub mod fs_ledger;
pub mod storage_traits;

pub use error::StorageError;
pub use fs_ledger::FsRunLedger;
pub use storage_traits::{
    RunEvent, RunId, RunLedger, RunMetadata, RunRecord, RunStatus, RunSummary, StorageResult,
};
