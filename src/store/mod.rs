//! Storage access for execution history, snapshots, and domain lookups.
//!
//! Every function takes the pool as an explicit parameter; nothing here
//! caches, retries, or holds global state.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::types::DataBlob;

pub mod domains;
pub mod history_v1;
pub mod history_v2;
pub mod mutable_state;

/// One page of history batches. A present continuation token means more
/// batches remain; feed it back into the read call to resume.
#[derive(Debug)]
pub struct HistoryPage {
    pub batches: Vec<DataBlob>,
    pub next_page_token: Option<Vec<u8>>,
}

pub(crate) fn encode_page_token<T: Serialize>(token: &T) -> Result<Vec<u8>> {
    bincode::serialize(token).map_err(|e| Error::Codec(format!("encode page token: {}", e)))
}

pub(crate) fn decode_page_token<T: DeserializeOwned>(raw: &[u8]) -> Result<T> {
    bincode::deserialize(raw).map_err(|e| Error::Codec(format!("decode page token: {}", e)))
}
