//! Structured lifecycle events for release runs.
//!
//! Every event carries an `event` field (`run.started`, `stage.started`,
//! `stage.finished`, `run.finished`, `release.incomplete`) so log
//! aggregation can filter on it. Events are emitted inside the span from
//! [`run_span`].

use crate::error::Stage;
use tracing::{info, warn, Span};

/// Span tagging everything a run logs with its id and ref.
///
/// Attach it with `tracing::Instrument` so the run future stays `Send`.
pub fn run_span(run_id: &str, ref_name: &str) -> Span {
    tracing::info_span!("tagship.run", run_id = %run_id, ref_name = %ref_name)
}

pub fn emit_run_started(run_id: &str, ref_name: &str, ref_kind: &str) {
    info!(event = "run.started", run_id = %run_id, ref_name = %ref_name, ref_kind = %ref_kind);
}

pub fn emit_stage_started(stage: Stage) {
    info!(event = "stage.started", stage = %stage);
}

/// `outcome` is `ok`, `no_op`, or the failing error kind.
pub fn emit_stage_finished(stage: Stage, duration_ms: u64, outcome: &str) {
    info!(
        event = "stage.finished",
        stage = %stage,
        duration_ms = duration_ms,
        outcome = %outcome,
    );
}

pub fn emit_run_finished(run_id: &str, final_state: &str, exit_code: i32, duration_ms: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        final_state = %final_state,
        exit_code = exit_code,
        duration_ms = duration_ms,
    );
}

/// A release may exist on the platform with some or none of its assets.
/// Needs an operator.
pub fn emit_release_incomplete(tag: &str, release_id: Option<&str>, uploaded: &[String], reason: &str) {
    warn!(
        event = "release.incomplete",
        tag = %tag,
        release_id = release_id.unwrap_or("unknown"),
        uploaded = ?uploaded,
        reason = %reason,
        "release may be incomplete; inspect it before re-pushing the tag"
    );
}

/// Ledger writes never change a run's outcome; failures are only logged.
pub fn emit_ledger_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "ledger.error", run_id = %run_id, error = %error);
}
