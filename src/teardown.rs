//! Full teardown of a workflow execution.
//!
//! Removal walks a fixed sequence over one execution key: resolve the
//! snapshot and pick the history path, then delete history, snapshot, and
//! current pointer in that order. History goes first so a half-finished
//! teardown never leaves history rows unreachable behind a deleted
//! snapshot; version resolution goes before any delete so a mixed V1/V2
//! fleet can't misroute one.

use sqlx::PgPool;

use crate::branch_token;
use crate::error::{Error, PartialDeletion, Result, StepFailure, TeardownStep};
use crate::store::{history_v1, history_v2, mutable_state};
use crate::types::{EventStoreVersion, ExecutionKey, HistoryPath, MutableStateSnapshot};

/// How teardown reacts to a failing step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownMode {
    /// The first error aborts the remaining steps and is surfaced verbatim.
    FailFast,
    /// Errors are recorded and every step is still attempted; the final
    /// result names each failed step.
    SkipAndContinue,
}

/// What a completed teardown did.
#[derive(Debug)]
pub struct TeardownReport {
    pub key: ExecutionKey,
    pub path: HistoryPath,
    pub shard_id: i32,
    pub completed: Vec<TeardownStep>,
}

/// Select the history path for a snapshot, decoding the branch token once.
/// Every later dispatch goes through the returned variant.
pub fn resolve_history_path(snapshot: &MutableStateSnapshot) -> Result<HistoryPath> {
    match snapshot.event_store_version {
        EventStoreVersion::V1 => Ok(HistoryPath::V1),
        EventStoreVersion::V2 => {
            let token = snapshot
                .branch_token
                .as_deref()
                .ok_or_else(|| Error::Decode {
                    what: "execution snapshot",
                    reason: "v2 execution is missing its branch token".to_string(),
                })?;
            Ok(HistoryPath::V2(branch_token::decode(token)?))
        }
    }
}

/// Remove an execution: history, snapshot row, and current pointer.
///
/// Resolution failures are fatal in both modes, since without the snapshot
/// the deletes cannot be routed. Each delete primitive is idempotent, so
/// repeated or overlapping removals converge on the same absent state.
pub async fn remove_execution(
    pool: &PgPool,
    key: &ExecutionKey,
    mode: TeardownMode,
) -> Result<TeardownReport> {
    let snapshot = mutable_state::get_snapshot(pool, key).await?;
    let path = resolve_history_path(&snapshot)?;
    tracing::debug!(
        key = %key,
        shard_id = snapshot.shard_id,
        "resolved execution for teardown"
    );

    let mut outcomes: Vec<(TeardownStep, Result<()>)> = Vec::with_capacity(3);

    let history = match &path {
        HistoryPath::V1 => history_v1::delete_history(pool, key).await,
        HistoryPath::V2(branch) => history_v2::delete_branch(pool, branch).await,
    };
    record(mode, TeardownStep::History, history, &mut outcomes)?;

    let snapshot_row = mutable_state::delete_snapshot(pool, key).await;
    record(mode, TeardownStep::Snapshot, snapshot_row, &mut outcomes)?;

    let pointer = mutable_state::delete_current_pointer(pool, key).await;
    record(mode, TeardownStep::CurrentPointer, pointer, &mut outcomes)?;

    finish_teardown(key, path, snapshot.shard_id, outcomes)
}

fn record(
    mode: TeardownMode,
    step: TeardownStep,
    result: Result<()>,
    outcomes: &mut Vec<(TeardownStep, Result<()>)>,
) -> Result<()> {
    if mode == TeardownMode::FailFast {
        result?;
        outcomes.push((step, Ok(())));
    } else {
        outcomes.push((step, result));
    }
    Ok(())
}

/// Fold per-step outcomes into the final result: a report when everything
/// was deleted, a partial-deletion error naming each failed step otherwise.
fn finish_teardown(
    key: &ExecutionKey,
    path: HistoryPath,
    shard_id: i32,
    outcomes: Vec<(TeardownStep, Result<()>)>,
) -> Result<TeardownReport> {
    let mut completed = Vec::new();
    let mut failed = Vec::new();
    for (step, result) in outcomes {
        match result {
            Ok(()) => completed.push(step),
            Err(e) => failed.push(StepFailure {
                step,
                reason: e.to_string(),
            }),
        }
    }

    if failed.is_empty() {
        Ok(TeardownReport {
            key: key.clone(),
            path,
            shard_id,
            completed,
        })
    } else {
        Err(Error::PartialDeletion(PartialDeletion { failed }))
    }
}
