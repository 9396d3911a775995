//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryRunLedger` satisfies the `RunLedger` contract without touching the
//! filesystem.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug)]
struct RunState {
    record: RunRecord,
    events: Vec<RunEvent>,
}

/// In-memory run ledger backed by a `HashMap<RunId, RunState>`.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs recorded so far.
    pub fn len(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn not_found(run_id: &RunId) -> StorageError {
    StorageError::RunNotFound {
        run_id: run_id.0.clone(),
    }
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn create_run(&self, metadata: RunMetadata) -> StorageResult<RunId> {
        let record = new_record(metadata);
        let run_id = record.run_id.clone();
        let mut runs = self.runs.lock().unwrap();
        runs.insert(
            run_id.0.clone(),
            RunState {
                record,
                events: Vec::new(),
            },
        );
        Ok(run_id)
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let state = runs.get_mut(&run_id.0).ok_or_else(|| not_found(run_id))?;
        let last_seq = state.events.last().map(|e| e.seq);
        check_append(run_id, &state.record, last_seq, &event)?;
        state.events.push(event);
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        summary: RunSummary,
    ) -> StorageResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let state = runs.get_mut(&run_id.0).ok_or_else(|| not_found(run_id))?;
        check_finish(run_id, &state.record, status)?;
        state.record.status = status;
        state.record.summary = Some(summary);
        state.record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let runs = self.runs.lock().unwrap();
        runs.get(&run_id.0)
            .map(|s| s.record.clone())
            .ok_or_else(|| not_found(run_id))
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        let runs = self.runs.lock().unwrap();
        let state = runs.get(&run_id.0).ok_or_else(|| not_found(run_id))?;
        Ok(state.events.clone())
    }

    async fn list_runs(&self, limit: Option<usize>) -> StorageResult<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap();
        let mut records: Vec<RunRecord> = runs.values().map(|s| s.record.clone()).collect();
        sort_newest_first(&mut records, limit);
        Ok(records)
    }
}
