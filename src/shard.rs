//! Workflow-to-shard routing.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Map a workflow id onto its shard.
///
/// The mapping hashes the workflow id with SHA-256 and reduces the first
/// four digest bytes modulo the shard count, so the same input yields the
/// same shard across calls and process restarts. Fails before any I/O when
/// the shard count is not positive.
pub fn compute_shard_id(workflow_id: &str, number_of_shards: i32) -> Result<i32> {
    if number_of_shards <= 0 {
        return Err(Error::Config(format!(
            "number of shards must be positive, got {}",
            number_of_shards
        )));
    }

    let digest = Sha256::digest(workflow_id.as_bytes());
    let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    Ok((hash % number_of_shards as u32) as i32)
}
