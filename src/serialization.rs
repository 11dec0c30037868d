//! History batch serialization.
//!
//! Batches are persisted as opaque blobs tagged with their encoding. The
//! current encoding is JSON; MessagePack blobs written by older releases
//! still decode. Callers supply batches already ordered by node/event id,
//! so concatenating decoded batches preserves event order.

use crate::error::{Error, Result};
use crate::types::{DataBlob, Encoding, HistoryEvent};

/// Serialize an ordered batch of events into a storable blob.
pub fn serialize_batch(events: &[HistoryEvent], encoding: Encoding) -> Result<DataBlob> {
    if events.is_empty() {
        return Err(Error::Decode {
            what: "history batch",
            reason: "refusing to serialize an empty batch".to_string(),
        });
    }

    let data = match encoding {
        Encoding::Json => serde_json::to_vec(events).map_err(|e| Error::Decode {
            what: "history batch",
            reason: e.to_string(),
        })?,
        Encoding::MsgPack => rmp_serde::to_vec_named(events).map_err(|e| Error::Decode {
            what: "history batch",
            reason: e.to_string(),
        })?,
    };

    Ok(DataBlob { encoding, data })
}

/// Decode a stored blob back into its ordered event batch.
pub fn deserialize_batch(blob: &DataBlob) -> Result<Vec<HistoryEvent>> {
    let events: Vec<HistoryEvent> = match blob.encoding {
        Encoding::Json => serde_json::from_slice(&blob.data).map_err(|e| Error::Decode {
            what: "history batch",
            reason: e.to_string(),
        })?,
        Encoding::MsgPack => rmp_serde::from_slice(&blob.data).map_err(|e| Error::Decode {
            what: "history batch",
            reason: e.to_string(),
        })?,
    };

    if events.is_empty() {
        return Err(Error::Decode {
            what: "history batch",
            reason: "batch contains no events".to_string(),
        });
    }

    Ok(events)
}

/// Decode a sequence of blobs and concatenate their events in order.
pub fn deserialize_batches(blobs: &[DataBlob]) -> Result<Vec<HistoryEvent>> {
    let mut events = Vec::new();
    for blob in blobs {
        events.extend(deserialize_batch(blob)?);
    }
    Ok(events)
}
