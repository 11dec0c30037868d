//! Flat (V1) history store.
//!
//! History lives in `history_events`, one batch blob per row, keyed by
//! `(domain_id, workflow_id, run_id, first_event_id)`. Rows are read back in
//! ascending `first_event_id` order, which is ascending event order.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};

use crate::error::{Error, Result};
use crate::types::{DataBlob, Encoding, ExecutionKey};

use super::{decode_page_token, encode_page_token, HistoryPage};

#[derive(Debug, Serialize, Deserialize)]
struct PageToken {
    next_first_event_id: i64,
}

/// Read a page of history batches for an execution.
///
/// Returns batches whose first event id lies in
/// `[first_event_id, next_event_id)`, at most `page_size` rows per call.
/// The first page of a missing history is a not-found error; later pages
/// may come back empty once the range is drained.
pub async fn get_history(
    pool: &PgPool,
    key: &ExecutionKey,
    first_event_id: i64,
    next_event_id: i64,
    page_size: i64,
    page_token: Option<&[u8]>,
) -> Result<HistoryPage> {
    let resuming = page_token.is_some();
    let min_first_event_id = match page_token {
        Some(raw) => decode_page_token::<PageToken>(raw)?
            .next_first_event_id
            .max(first_event_id),
        None => first_event_id,
    };

    let rows = sqlx::query(
        r#"
        SELECT first_event_id, data, data_encoding
        FROM history_events
        WHERE domain_id = $1
          AND workflow_id = $2
          AND run_id = $3
          AND first_event_id >= $4
          AND first_event_id < $5
        ORDER BY first_event_id
        LIMIT $6
        "#,
    )
    .bind(&key.domain_id)
    .bind(&key.workflow_id)
    .bind(&key.run_id)
    .bind(min_first_event_id)
    .bind(next_event_id)
    .bind(page_size)
    .fetch_all(pool)
    .await
    .map_err(Error::storage("get_history"))?;

    if rows.is_empty() && !resuming {
        return Err(Error::NotFound {
            what: "history",
            key: key.to_string(),
        });
    }

    let mut batches = Vec::with_capacity(rows.len());
    let mut last_first_event_id = min_first_event_id;
    for row in &rows {
        last_first_event_id = row.get("first_event_id");
        let encoding: Encoding = row.get::<String, _>("data_encoding").parse()?;
        batches.push(DataBlob {
            encoding,
            data: row.get("data"),
        });
    }

    let next_page_token = if rows.len() as i64 == page_size && last_first_event_id + 1 < next_event_id
    {
        Some(encode_page_token(&PageToken {
            next_first_event_id: last_first_event_id + 1,
        })?)
    } else {
        None
    };

    Ok(HistoryPage {
        batches,
        next_page_token,
    })
}

/// Delete every history row for an execution. Idempotent: deleting an
/// already-absent history succeeds.
pub async fn delete_history(pool: &PgPool, key: &ExecutionKey) -> Result<()> {
    let result = sqlx::query(
        r#"
        DELETE FROM history_events
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
    .map_err(Error::storage("delete_history"))?;

    tracing::debug!(
        key = %key,
        rows = result.rows_affected(),
        "deleted v1 history"
    );
    Ok(())
}
