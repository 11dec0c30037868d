use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Error;

/// Blob encodings supported by the history serializer.
///
/// `Json` is the current encoding; `MsgPack` is the older compact encoding
/// still present in long-lived histories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Json,
    MsgPack,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::MsgPack => "msgpack",
        }
    }
}

impl FromStr for Encoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Encoding::Json),
            "msgpack" => Ok(Encoding::MsgPack),
            other => Err(Error::Decode {
                what: "history batch",
                reason: format!("unsupported encoding '{}'", other),
            }),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single immutable history event. Event ids increase monotonically within
/// an execution and are never reassigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: i64,
    pub event_type: String,
    pub version: i64,
    pub timestamp: DateTime<Utc>,
    pub attributes: JsonValue,
}

/// An opaque serialized batch of contiguous history events, as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlob {
    pub encoding: Encoding,
    pub data: Vec<u8>,
}

impl DataBlob {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One entry in a branch's ancestor chain. Nodes with id at or below
/// `fork_node_id` belong to the ancestor; nodes above it belong to the
/// descendant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchAncestor {
    pub branch_id: String,
    pub fork_node_id: i64,
}

/// Identity of a history branch and its ancestor chain, ordered root to
/// leaf. Fork node ids strictly increase along the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub tree_id: String,
    pub branch_id: String,
    pub ancestors: Vec<BranchAncestor>,
}

impl BranchInfo {
    /// The nearest fork point: the highest node id this branch inherits.
    /// A root branch forks at 0 and owns every node.
    pub fn fork_point(&self) -> i64 {
        self.ancestors.last().map(|a| a.fork_node_id).unwrap_or(0)
    }
}

/// Which on-disk history schema an execution was written under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStoreVersion {
    V1,
    V2,
}

impl EventStoreVersion {
    pub fn from_i16(v: i16) -> Option<EventStoreVersion> {
        match v {
            1 => Some(EventStoreVersion::V1),
            2 => Some(EventStoreVersion::V2),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> i16 {
        match self {
            EventStoreVersion::V1 => 1,
            EventStoreVersion::V2 => 2,
        }
    }
}

/// Uniquely identifies an execution's snapshot and current-pointer rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionKey {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
}

impl fmt::Display for ExecutionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain_id, self.workflow_id, self.run_id)
    }
}

/// The durable control snapshot of an execution. Read-only for the admin
/// tool: it routes history access to V1 or V2 and locates the shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutableStateSnapshot {
    pub domain_id: String,
    pub workflow_id: String,
    pub run_id: String,
    pub shard_id: i32,
    pub event_store_version: EventStoreVersion,
    #[serde(with = "base64_bytes")]
    pub branch_token: Option<Vec<u8>>,
}

/// Version dispatch for history access, selected once while resolving the
/// snapshot so no later step inspects raw version fields.
#[derive(Debug, Clone)]
pub enum HistoryPath {
    V1,
    V2(BranchInfo),
}

/// Serde helper rendering optional byte fields as base64 strings.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        v.as_ref().map(|b| STANDARD.encode(b)).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_round_trips_through_str() {
        for enc in [Encoding::Json, Encoding::MsgPack] {
            assert_eq!(enc.as_str().parse::<Encoding>().unwrap(), enc);
        }
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        let err = "thriftrw".parse::<Encoding>().unwrap_err();
        assert!(err.to_string().contains("thriftrw"));
    }

    #[test]
    fn event_store_version_maps_from_storage() {
        assert_eq!(EventStoreVersion::from_i16(1), Some(EventStoreVersion::V1));
        assert_eq!(EventStoreVersion::from_i16(2), Some(EventStoreVersion::V2));
        assert_eq!(EventStoreVersion::from_i16(7), None);
    }

    #[test]
    fn fork_point_is_last_ancestor() {
        let mut branch = BranchInfo {
            tree_id: "t".into(),
            branch_id: "b".into(),
            ancestors: vec![],
        };
        assert_eq!(branch.fork_point(), 0);

        branch.ancestors = vec![
            BranchAncestor {
                branch_id: "root".into(),
                fork_node_id: 4,
            },
            BranchAncestor {
                branch_id: "mid".into(),
                fork_node_id: 9,
            },
        ];
        assert_eq!(branch.fork_point(), 9);
    }

    #[test]
    fn snapshot_branch_token_serializes_as_base64() {
        let snapshot = MutableStateSnapshot {
            domain_id: "d1".into(),
            workflow_id: "wf-1".into(),
            run_id: "r1".into(),
            shard_id: 3,
            event_store_version: EventStoreVersion::V2,
            branch_token: Some(vec![1, 2, 3]),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["branch_token"], "AQID");

        let back: MutableStateSnapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back.branch_token, Some(vec![1, 2, 3]));
    }
}
