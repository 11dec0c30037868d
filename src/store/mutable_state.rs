//! Execution snapshot and current-pointer access.
//!
//! The snapshot row in `executions` carries the control fields the admin
//! tool routes on: shard, event store version, and (for V2) the branch
//! token. The row in `current_executions` records which run is presently
//! active for a workflow id. Both are read-only here except for teardown.

use sqlx::{PgPool, Row};

use crate::error::{Error, Result};
use crate::types::{EventStoreVersion, ExecutionKey, MutableStateSnapshot};

/// Read an execution's control snapshot.
///
/// Decoding is strict: an unknown event store version or a V2 row without a
/// branch token is a decode failure, not a silently degraded read.
pub async fn get_snapshot(pool: &PgPool, key: &ExecutionKey) -> Result<MutableStateSnapshot> {
    let row = sqlx::query(
        r#"
        SELECT shard_id, event_store_version, branch_token
        FROM executions
        WHERE domain_id = $1
          AND workflow_id = $2
          AND run_id = $3
        "#,
    )
    .bind(&key.domain_id)
    .bind(&key.workflow_id)
    .bind(&key.run_id)
    .fetch_optional(pool)
    .await
    .map_err(Error::storage("get_snapshot"))?;

    let row = row.ok_or_else(|| Error::NotFound {
        what: "execution snapshot",
        key: key.to_string(),
    })?;

    let raw_version: i16 = row.try_get("event_store_version").map_err(|e| Error::Decode {
        what: "execution snapshot",
        reason: e.to_string(),
    })?;
    let event_store_version =
        EventStoreVersion::from_i16(raw_version).ok_or_else(|| Error::Decode {
            what: "execution snapshot",
            reason: format!("unknown event store version {}", raw_version),
        })?;

    let branch_token: Option<Vec<u8>> = row.try_get("branch_token").map_err(|e| Error::Decode {
        what: "execution snapshot",
        reason: e.to_string(),
    })?;
    if event_store_version == EventStoreVersion::V2 && branch_token.is_none() {
        return Err(Error::Decode {
            what: "execution snapshot",
            reason: "v2 execution is missing its branch token".to_string(),
        });
    }

    Ok(MutableStateSnapshot {
        domain_id: key.domain_id.clone(),
        workflow_id: key.workflow_id.clone(),
        run_id: key.run_id.clone(),
        shard_id: row.get("shard_id"),
        event_store_version,
        branch_token,
    })
}

/// Resolve which run is presently active for a workflow id.
pub async fn get_current_run_id(
    pool: &PgPool,
    domain_id: &str,
    workflow_id: &str,
) -> Result<String> {
    let row = sqlx::query(
        r#"
        SELECT run_id
        FROM current_executions
        WHERE domain_id = $1
          AND workflow_id = $2
        "#,
    )
    .bind(domain_id)
    .bind(workflow_id)
    .fetch_optional(pool)
    .await
    .map_err(Error::storage("get_current_run_id"))?;

    match row {
        Some(row) => Ok(row.get("run_id")),
        None => Err(Error::NotFound {
            what: "current execution",
            key: format!("{}/{}", domain_id, workflow_id),
        }),
    }
}

/// Delete an execution's snapshot row. Idempotent.
pub async fn delete_snapshot(pool: &PgPool, key: &ExecutionKey) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM executions
        WHERE domain_id = $1
          AND workflow_id = $2
          AND run_id = $3
        "#,
    )
    .bind(&key.domain_id)
    .bind(&key.workflow_id)
    .bind(&key.run_id)
    .execute(pool)
    .await
    .map_err(Error::storage("delete_snapshot"))?;

    tracing::debug!(key = %key, rows = result.rows_affected(), "deleted snapshot row");
    Ok(())
}

/// Delete the current pointer for this run, if it still points at it.
/// Independent of [`delete_snapshot`]; full teardown attempts both.
pub async fn delete_current_pointer(pool: &PgPool, key: &ExecutionKey) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM current_executions
        WHERE domain_id = $1
          AND workflow_id = $2
          AND run_id = $3
        "#,
    )
    .bind(&key.domain_id)
    .bind(&key.workflow_id)
    .bind(&key.run_id)
    .execute(pool)
    .await
    .map_err(Error::storage("delete_current_pointer"))?;

    tracing::debug!(key = %key, rows = result.rows_affected(), "deleted current pointer");
    Ok(())
}
