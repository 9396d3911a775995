//! Filesystem-backed run ledger.
//!
//! Layout: `<root>/<run_id>.json`, one document per run holding the record
//! and its events. Every write goes through a temp file in `<root>` followed
//! by a rename, so readers never observe a half-written run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Serialize, Deserialize)]
struct RunDocument {
    record: RunRecord,
    events: Vec<RunEvent>,
}

/// JSON-file run ledger used by the CLI.
pub struct FsRunLedger {
    root: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FsRunLedger {
    /// Open a ledger rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the run documents.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_path(&self, run_id: &RunId) -> PathBuf {
        self.root.join(format!("{}.json", run_id.0))
    }

    fn load(&self, run_id: &RunId) -> StorageResult<RunDocument> {
        let path = self.run_path(run_id);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::RunNotFound {
                    run_id: run_id.0.clone(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn store(&self, doc: &RunDocument) -> StorageResult<()> {
        let path = self.run_path(&doc.record.run_id);
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        serde_json::to_writer_pretty(&mut tmp, doc)?;
        tmp.write_all(b"\n")?;
        tmp.persist(&path).map_err(|e| e.error)?;
        debug!(path = %path.display(), "ledger document written");
        Ok(())
    }
}

#[async_trait]
impl RunLedger for FsRunLedger {
    async fn create_run(&self, metadata: RunMetadata) -> StorageResult<RunId> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let doc = RunDocument {
            record: new_record(metadata),
            events: Vec::new(),
        };
        self.store(&doc)?;
        Ok(doc.record.run_id)
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut doc = self.load(run_id)?;
        let last_seq = doc.events.last().map(|e| e.seq);
        check_append(run_id, &doc.record, last_seq, &event)?;
        doc.events.push(event);
        self.store(&doc)
    }

    async fn finish_run(
        &self,
        run_id: &RunId,
        status: RunStatus,
        summary: RunSummary,
    ) -> StorageResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut doc = self.load(run_id)?;
        check_finish(run_id, &doc.record, status)?;
        doc.record.status = status;
        doc.record.summary = Some(summary);
        doc.record.completed_at = Some(Utc::now());
        self.store(&doc)
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        Ok(self.load(run_id)?.record)
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        Ok(self.load(run_id)?.events)
    }

    async fn list_runs(&self, limit: Option<usize>) -> StorageResult<Vec<RunRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().map(|e| e != "json").unwrap_or(true) {
                continue;
            }
            match fs::read(&path)
                .map_err(StorageError::from)
                .and_then(|b| serde_json::from_slice::<RunDocument>(&b).map_err(Into::into))
            {
                Ok(doc) => records.push(doc.record),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable run document"),
            }
        }
        sort_newest_first(&mut records, limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(ref_name: &str) -> RunMetadata {
        RunMetadata {
            ref_name: ref_name.to_string(),
            ref_kind: "tag".to_string(),
            config_digest: "cfg".to_string(),
            tags: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn run_document_lands_in_root() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FsRunLedger::new(dir.path().join("runs")).unwrap();
        let run_id = ledger.create_run(metadata("v1.0.0")).await.unwrap();

        let path = ledger.root().join(format!("{}.json", run_id));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn reopened_ledger_sees_previous_runs() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = {
            let ledger = FsRunLedger::new(dir.path()).unwrap();
            let run_id = ledger.create_run(metadata("v1.0.0")).await.unwrap();
            ledger
                .append_event(&run_id, RunEvent::now(1, "stage_started", serde_json::json!({})))
                .await
                .unwrap();
            run_id
        };

        let ledger = FsRunLedger::new(dir.path()).unwrap();
        let events = ledger.get_events(&run_id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "stage_started");
    }

    #[tokio::test]
    async fn stray_files_are_ignored_by_list() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FsRunLedger::new(dir.path()).unwrap();
        ledger.create_run(metadata("v1.0.0")).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();

        let runs = ledger.list_runs(None).await.unwrap();
        assert_eq!(runs.len(), 1);
    }
}
