//! Branch token encoding.
//!
//! A branch token is the compact descriptor of a branch and its ancestor
//! chain, carried opaquely inside the execution snapshot. The wire format is
//! one leading format byte followed by a bincode-serialized [`BranchInfo`];
//! it must stay stable across process versions, since tokens written by one
//! release are decoded by every later one.

use crate::error::{Error, Result};
use crate::types::BranchInfo;

const TOKEN_FORMAT: u8 = 1;

/// Encode a branch descriptor into an opaque token.
pub fn encode(branch: &BranchInfo) -> Result<Vec<u8>> {
    let payload =
        bincode::serialize(branch).map_err(|e| Error::Codec(format!("encode branch: {}", e)))?;
    let mut token = Vec::with_capacity(1 + payload.len());
    token.push(TOKEN_FORMAT);
    token.extend(payload);
    Ok(token)
}

/// Decode an opaque token back into its branch descriptor.
pub fn decode(token: &[u8]) -> Result<BranchInfo> {
    let (format, payload) = match token.split_first() {
        Some(parts) => parts,
        None => return Err(Error::Codec("empty branch token".to_string())),
    };
    if *format != TOKEN_FORMAT {
        return Err(Error::Codec(format!(
            "unsupported branch token format {}",
            format
        )));
    }
    bincode::deserialize(payload).map_err(|e| Error::Codec(format!("decode branch: {}", e)))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::types::BranchAncestor;

    fn forked_branch() -> BranchInfo {
        BranchInfo {
            tree_id: "tree-9c41".to_string(),
            branch_id: "branch-leaf".to_string(),
            ancestors: vec![
                BranchAncestor {
                    branch_id: "branch-root".to_string(),
                    fork_node_id: 3,
                },
                BranchAncestor {
                    branch_id: "branch-mid".to_string(),
                    fork_node_id: 8,
                },
            ],
        }
    }

    #[test]
    fn token_round_trips() {
        let branch = forked_branch();
        let token = encode(&branch).unwrap();
        assert_eq!(decode(&token).unwrap(), branch);
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(decode(&[]), Err(Error::Codec(_))));
    }

    #[test]
    fn unknown_format_byte_is_rejected() {
        let mut token = encode(&forked_branch()).unwrap();
        token[0] = 0x7f;
        assert!(matches!(decode(&token), Err(Error::Codec(_))));
    }

    #[test]
    fn truncated_token_is_rejected() {
        let token = encode(&forked_branch()).unwrap();
        assert!(decode(&token[..token.len() / 2]).is_err());
    }

    proptest! {
        #[test]
        fn any_valid_branch_round_trips(
            tree_id in "[a-z0-9-]{1,24}",
            branch_id in "[a-z0-9-]{1,24}",
            forks in proptest::collection::vec(1i64..1_000_000, 0..5),
        ) {
            let mut sorted = forks;
            sorted.sort_unstable();
            sorted.dedup();
            let ancestors = sorted
                .iter()
                .enumerate()
                .map(|(i, &fork_node_id)| BranchAncestor {
                    branch_id: format!("anc-{}", i),
                    fork_node_id,
                })
                .collect();
            let branch = BranchInfo { tree_id, branch_id, ancestors };
            prop_assert_eq!(decode(&encode(&branch).unwrap()).unwrap(), branch);
        }
    }
}
