//! Tree-structured (V2) history store.
//!
//! Nodes live in `history_node` keyed `(tree_id, branch_id, node_id)`;
//! branch metadata lives in `history_tree` keyed `(tree_id, branch_id)` with
//! the ancestor chain as a JSONB list. A branch's logical history spans its
//! ancestors up to each fork point plus its own exclusive nodes, so reads
//! walk the chain root to leaf and deletes must never cross a fork point
//! still visible to someone else.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};

use crate::error::{Error, Result};
use crate::types::{BranchAncestor, BranchInfo, DataBlob, Encoding};

use super::{decode_page_token, encode_page_token, HistoryPage};

/// A contiguous `[min_node_id, max_node_id)` slice of one branch's rows.
#[derive(Debug, Clone, PartialEq, Eq)]
struct NodeRange {
    branch_id: String,
    min_node_id: i64,
    max_node_id: i64,
}

/// Lay out the physical reads behind a branch's logical history.
///
/// Ancestors are ordered root to leaf with strictly increasing fork points
/// `f1 < f2 < …`: the first ancestor owns nodes `[1, f1]`, the next
/// `(f1, f2]`, and the branch itself everything above the last fork point.
/// Ranges are clipped to the requested `[min_node_id, max_node_id)` window;
/// concatenating them in order yields strictly increasing node ids.
fn plan_branch_ranges(branch: &BranchInfo, min_node_id: i64, max_node_id: i64) -> Vec<NodeRange> {
    let mut ranges = Vec::with_capacity(branch.ancestors.len() + 1);
    let mut begin = 1i64;
    for ancestor in &branch.ancestors {
        ranges.push(NodeRange {
            branch_id: ancestor.branch_id.clone(),
            min_node_id: begin,
            max_node_id: ancestor.fork_node_id + 1,
        });
        begin = ancestor.fork_node_id + 1;
    }
    ranges.push(NodeRange {
        branch_id: branch.branch_id.clone(),
        min_node_id: begin,
        max_node_id: i64::MAX,
    });

    ranges
        .into_iter()
        .map(|r| NodeRange {
            min_node_id: r.min_node_id.max(min_node_id),
            max_node_id: r.max_node_id.min(max_node_id),
            ..r
        })
        .filter(|r| r.min_node_id < r.max_node_id)
        .collect()
}

/// True when some other branch in the tree still inherits from `branch_id`.
fn still_referenced(branch_id: &str, branches: &[BranchInfo]) -> bool {
    branches.iter().any(|b| {
        b.branch_id != branch_id && b.ancestors.iter().any(|a| a.branch_id == branch_id)
    })
}

/// Highest node id of `branch` still visible to someone else: its own fork
/// point, raised to the highest fork any other branch takes off it. Only
/// nodes strictly above this floor are safe to delete.
fn exclusive_floor(branch: &BranchInfo, branches: &[BranchInfo]) -> i64 {
    let mut floor = branch.fork_point();
    for other in branches {
        if other.branch_id == branch.branch_id {
            continue;
        }
        for ancestor in &other.ancestors {
            if ancestor.branch_id == branch.branch_id {
                floor = floor.max(ancestor.fork_node_id);
            }
        }
    }
    floor
}

#[derive(Debug, Serialize, Deserialize)]
struct PageToken {
    range_index: u64,
    next_node_id: i64,
}

/// Read a page of a branch's logical history, ancestor nodes included.
///
/// Batches come back in ascending node id order, at most `page_size` node
/// rows per call, resuming from `page_token` when present. The first page of
/// an empty window is a not-found error.
pub async fn read_branch(
    pool: &PgPool,
    branch: &BranchInfo,
    min_node_id: i64,
    max_node_id: i64,
    page_size: i64,
    page_token: Option<&[u8]>,
) -> Result<HistoryPage> {
    let ranges = plan_branch_ranges(branch, min_node_id, max_node_id);
    let resuming = page_token.is_some();
    let (mut range_index, mut cursor) = match page_token {
        Some(raw) => {
            let token: PageToken = decode_page_token(raw)?;
            (token.range_index as usize, Some(token.next_node_id))
        }
        None => (0, None),
    };

    let mut batches = Vec::new();
    let mut next_page_token = None;

    'ranges: while range_index < ranges.len() {
        let range = &ranges[range_index];
        let mut from = match cursor.take() {
            Some(c) => c.max(range.min_node_id),
            None => range.min_node_id,
        };

        loop {
            let remaining = page_size - batches.len() as i64;
            if remaining <= 0 {
                next_page_token = Some(encode_page_token(&PageToken {
                    range_index: range_index as u64,
                    next_node_id: from,
                })?);
                break 'ranges;
            }

            let rows = sqlx::query(
                r#"
                SELECT node_id, data, data_encoding
                FROM history_node
                WHERE tree_id = $1
                  AND branch_id = $2
                  AND node_id >= $3
                  AND node_id < $4
                ORDER BY node_id
                LIMIT $5
                "#,
            )
            .bind(&branch.tree_id)
            .bind(&range.branch_id)
            .bind(from)
            .bind(range.max_node_id)
            .bind(remaining)
            .fetch_all(pool)
            .await
            .map_err(Error::storage("read_branch"))?;

            if rows.is_empty() {
                break;
            }

            let fetched = rows.len() as i64;
            for row in &rows {
                from = row.get::<i64, _>("node_id") + 1;
                let encoding: Encoding = row.get::<String, _>("data_encoding").parse()?;
                batches.push(DataBlob {
                    encoding,
                    data: row.get("data"),
                });
            }
            if fetched < remaining {
                break;
            }
        }

        range_index += 1;
    }

    if batches.is_empty() && !resuming {
        return Err(Error::NotFound {
            what: "history branch",
            key: format!("{}/{}", branch.tree_id, branch.branch_id),
        });
    }

    Ok(HistoryPage {
        batches,
        next_page_token,
    })
}

/// Delete the nodes a branch exclusively owns, and its metadata row once no
/// descendant still reads through it.
///
/// Only nodes strictly above the nearest fork point are removed, and when a
/// descendant branch forks off this one the delete stops above that fork
/// too: a range some other branch still reads through is never touched, so
/// no descendant's read path is orphaned. Idempotent: deleting an
/// already-deleted branch succeeds.
pub async fn delete_branch(pool: &PgPool, branch: &BranchInfo) -> Result<()> {
    let branches = load_tree_branches(pool, &branch.tree_id).await?;
    let floor = exclusive_floor(branch, &branches);
    let result = sqlx::query(
        r#"
        DELETE FROM history_node
        WHERE tree_id = $1
          AND branch_id = $2
          AND node_id > $3
        "#,
    )
    .bind(&branch.tree_id)
    .bind(&branch.branch_id)
    .bind(floor)
    .execute(pool)
    .await
    .map_err(Error::storage("delete_branch"))?;

    tracing::debug!(
        tree_id = %branch.tree_id,
        branch_id = %branch.branch_id,
        floor,
        rows = result.rows_affected(),
        "deleted branch-exclusive nodes"
    );

    if still_referenced(&branch.branch_id, &branches) {
        tracing::debug!(
            tree_id = %branch.tree_id,
            branch_id = %branch.branch_id,
            "branch still inherited by a descendant, keeping metadata"
        );
        return Ok(());
    }

    sqlx::query(
        r#"
        DELETE FROM history_tree
        WHERE tree_id = $1
          AND branch_id = $2
        "#,
    )
    .bind(&branch.tree_id)
    .bind(&branch.branch_id)
    .execute(pool)
    .await
    .map_err(Error::storage("delete_branch"))?;

    Ok(())
}

/// Look up a branch descriptor from the metadata table.
pub async fn get_branch(pool: &PgPool, tree_id: &str, branch_id: &str) -> Result<BranchInfo> {
    let row = sqlx::query(
        r#"
        SELECT ancestors
        FROM history_tree
        WHERE tree_id = $1
          AND branch_id = $2
        "#,
    )
    .bind(tree_id)
    .bind(branch_id)
    .fetch_optional(pool)
    .await
    .map_err(Error::storage("get_branch"))?;

    let row = row.ok_or_else(|| Error::NotFound {
        what: "history branch",
        key: format!("{}/{}", tree_id, branch_id),
    })?;

    Ok(BranchInfo {
        tree_id: tree_id.to_string(),
        branch_id: branch_id.to_string(),
        ancestors: decode_ancestors(&row)?,
    })
}

async fn load_tree_branches(pool: &PgPool, tree_id: &str) -> Result<Vec<BranchInfo>> {
    let rows = sqlx::query(
        r#"
        SELECT branch_id, ancestors
        FROM history_tree
        WHERE tree_id = $1
        "#,
    )
    .bind(tree_id)
    .fetch_all(pool)
    .await
    .map_err(Error::storage("load_tree_branches"))?;

    rows.iter()
        .map(|row| {
            Ok(BranchInfo {
                tree_id: tree_id.to_string(),
                branch_id: row.get("branch_id"),
                ancestors: decode_ancestors(row)?,
            })
        })
        .collect()
}

fn decode_ancestors(row: &sqlx::postgres::PgRow) -> Result<Vec<BranchAncestor>> {
    let raw: JsonValue = row.try_get("ancestors").map_err(|e| Error::Decode {
        what: "branch metadata",
        reason: e.to_string(),
    })?;
    serde_json::from_value(raw).map_err(|e| Error::Decode {
        what: "branch metadata",
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forked_branch() -> BranchInfo {
        BranchInfo {
            tree_id: "tree-1".to_string(),
            branch_id: "leaf".to_string(),
            ancestors: vec![
                BranchAncestor {
                    branch_id: "root".to_string(),
                    fork_node_id: 3,
                },
                BranchAncestor {
                    branch_id: "mid".to_string(),
                    fork_node_id: 8,
                },
            ],
        }
    }

    fn range(branch_id: &str, min: i64, max: i64) -> NodeRange {
        NodeRange {
            branch_id: branch_id.to_string(),
            min_node_id: min,
            max_node_id: max,
        }
    }

    #[test]
    fn root_branch_plan_is_a_single_range() {
        let branch = BranchInfo {
            tree_id: "t".to_string(),
            branch_id: "root".to_string(),
            ancestors: vec![],
        };
        assert_eq!(
            plan_branch_ranges(&branch, 1, 100),
            vec![range("root", 1, 100)]
        );
    }

    #[test]
    fn forked_plan_walks_ancestors_root_to_leaf() {
        assert_eq!(
            plan_branch_ranges(&forked_branch(), 1, 9999),
            vec![range("root", 1, 4), range("mid", 4, 9), range("leaf", 9, 9999)]
        );
    }

    #[test]
    fn plan_clips_to_the_requested_window() {
        // Window starts past the first fork point: the root range drops out.
        assert_eq!(
            plan_branch_ranges(&forked_branch(), 5, 9999),
            vec![range("mid", 5, 9), range("leaf", 9, 9999)]
        );
        // Window ends below the first fork point: only the root remains.
        assert_eq!(
            plan_branch_ranges(&forked_branch(), 1, 3),
            vec![range("root", 1, 3)]
        );
        // Empty window plans nothing.
        assert!(plan_branch_ranges(&forked_branch(), 7, 7).is_empty());
    }

    #[test]
    fn plan_ranges_are_contiguous_and_ascending() {
        let ranges = plan_branch_ranges(&forked_branch(), 1, 9999);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].max_node_id, pair[1].min_node_id);
        }
    }

    #[test]
    fn referenced_branch_keeps_its_metadata() {
        let leaf = forked_branch();
        let mid = BranchInfo {
            tree_id: "tree-1".to_string(),
            branch_id: "mid".to_string(),
            ancestors: vec![BranchAncestor {
                branch_id: "root".to_string(),
                fork_node_id: 3,
            }],
        };
        let branches = vec![mid.clone(), leaf.clone()];

        // "mid" is on the leaf's ancestor chain; "leaf" is on nobody's.
        assert!(still_referenced("mid", &branches));
        assert!(still_referenced("root", &branches));
        assert!(!still_referenced("leaf", &branches));
    }

    #[test]
    fn exclusive_floor_stops_at_a_descendant_fork() {
        let leaf = forked_branch();
        let mid = BranchInfo {
            tree_id: "tree-1".to_string(),
            branch_id: "mid".to_string(),
            ancestors: vec![BranchAncestor {
                branch_id: "root".to_string(),
                fork_node_id: 3,
            }],
        };
        let root = BranchInfo {
            tree_id: "tree-1".to_string(),
            branch_id: "root".to_string(),
            ancestors: vec![],
        };
        let branches = vec![root.clone(), mid.clone(), leaf.clone()];

        // Nobody forks off the leaf: everything above its own fork point
        // is deletable.
        assert_eq!(exclusive_floor(&leaf, &branches), 8);
        // The leaf forks off mid at 8, so mid's 4..=8 must survive even
        // though mid's own fork point is 3.
        assert_eq!(exclusive_floor(&mid, &branches), 8);
        // Both descendants fork off root at 3: root keeps 1..=3.
        assert_eq!(exclusive_floor(&root, &branches), 3);
        // With the descendants gone, the floor falls back to the branch's
        // own fork point.
        assert_eq!(exclusive_floor(&mid, &[root, mid.clone()]), 3);
    }

    mod db {
        use serde_json::json;

        use super::*;
        use crate::serialization::{deserialize_batches, serialize_batch};
        use crate::types::HistoryEvent;

        async fn seed_node(pool: &PgPool, tree_id: &str, branch_id: &str, node_id: i64) {
            let events = vec![HistoryEvent {
                event_id: node_id,
                event_type: "TaskScheduled".to_string(),
                version: 1,
                timestamp: chrono::Utc::now(),
                attributes: json!({}),
            }];
            let blob = serialize_batch(&events, Encoding::Json).unwrap();
            sqlx::query(
                r#"
                INSERT INTO history_node (tree_id, branch_id, node_id, data, data_encoding)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(tree_id)
            .bind(branch_id)
            .bind(node_id)
            .bind(&blob.data)
            .bind(blob.encoding.as_str())
            .execute(pool)
            .await
            .unwrap();
        }

        async fn seed_branch(pool: &PgPool, branch: &BranchInfo) {
            sqlx::query(
                r#"
                INSERT INTO history_tree (tree_id, branch_id, ancestors)
                VALUES ($1, $2, $3)
                ON CONFLICT (tree_id, branch_id) DO NOTHING
                "#,
            )
            .bind(&branch.tree_id)
            .bind(&branch.branch_id)
            .bind(serde_json::to_value(&branch.ancestors).unwrap())
            .execute(pool)
            .await
            .unwrap();
        }

        async fn clear_tree(pool: &PgPool, tree_id: &str) {
            sqlx::query("DELETE FROM history_node WHERE tree_id = $1")
                .bind(tree_id)
                .execute(pool)
                .await
                .unwrap();
            sqlx::query("DELETE FROM history_tree WHERE tree_id = $1")
                .bind(tree_id)
                .execute(pool)
                .await
                .unwrap();
        }

        #[tokio::test]
        #[ignore] // Requires database
        async fn test_read_resolves_the_ancestor_chain() {
            let config = crate::config::Config::load().unwrap();
            let pool = crate::db::connect(&config).await.unwrap();
            let leaf = forked_branch();
            clear_tree(&pool, &leaf.tree_id).await;

            // root owns 1..=3, mid owns 4..=8, leaf owns 9..
            for id in 1..=3 {
                seed_node(&pool, &leaf.tree_id, "root", id).await;
            }
            for id in 4..=8 {
                seed_node(&pool, &leaf.tree_id, "mid", id).await;
            }
            for id in 9..=11 {
                seed_node(&pool, &leaf.tree_id, "leaf", id).await;
            }

            let mut batches = Vec::new();
            let mut token: Option<Vec<u8>> = None;
            loop {
                let page = read_branch(&pool, &leaf, 1, 9999, 4, token.as_deref())
                    .await
                    .unwrap();
                batches.extend(page.batches);
                match page.next_page_token {
                    Some(t) => token = Some(t),
                    None => break,
                }
            }

            let ids: Vec<i64> = deserialize_batches(&batches)
                .unwrap()
                .iter()
                .map(|e| e.event_id)
                .collect();
            assert_eq!(ids, (1..=11).collect::<Vec<i64>>());

            clear_tree(&pool, &leaf.tree_id).await;
        }

        #[tokio::test]
        #[ignore] // Requires database
        async fn test_delete_leaf_spares_nodes_below_the_fork_point() {
            let config = crate::config::Config::load().unwrap();
            let pool = crate::db::connect(&config).await.unwrap();
            let leaf = forked_branch();
            clear_tree(&pool, &leaf.tree_id).await;

            let mid = BranchInfo {
                tree_id: leaf.tree_id.clone(),
                branch_id: "mid".to_string(),
                ancestors: vec![BranchAncestor {
                    branch_id: "root".to_string(),
                    fork_node_id: 3,
                }],
            };
            for id in 1..=3 {
                seed_node(&pool, &leaf.tree_id, "root", id).await;
            }
            for id in 4..=8 {
                seed_node(&pool, &leaf.tree_id, "mid", id).await;
            }
            for id in 9..=11 {
                seed_node(&pool, &leaf.tree_id, "leaf", id).await;
            }
            seed_branch(&pool, &mid).await;
            seed_branch(&pool, &leaf).await;

            delete_branch(&pool, &leaf).await.unwrap();
            // Deleting the same branch again converges on the same state.
            delete_branch(&pool, &leaf).await.unwrap();

            // The mid branch still reads its full logical history.
            let page = read_branch(&pool, &mid, 1, 9999, 100, None).await.unwrap();
            let ids: Vec<i64> = deserialize_batches(&page.batches)
                .unwrap()
                .iter()
                .map(|e| e.event_id)
                .collect();
            assert_eq!(ids, (1..=8).collect::<Vec<i64>>());

            // The leaf's exclusive range is gone, and so is its metadata.
            assert!(read_branch(&pool, &leaf, 9, 9999, 100, None).await.is_err());
            assert!(get_branch(&pool, &leaf.tree_id, "leaf").await.is_err());
            // "mid" is still an ancestor of nobody now but keeps its own row.
            assert!(get_branch(&pool, &leaf.tree_id, "mid").await.is_ok());

            clear_tree(&pool, &leaf.tree_id).await;
        }

        #[tokio::test]
        #[ignore] // Requires database
        async fn test_delete_non_leaf_keeps_ranges_descendants_inherit() {
            let config = crate::config::Config::load().unwrap();
            let pool = crate::db::connect(&config).await.unwrap();
            let leaf = forked_branch();
            clear_tree(&pool, &leaf.tree_id).await;

            let root = BranchInfo {
                tree_id: leaf.tree_id.clone(),
                branch_id: "root".to_string(),
                ancestors: vec![],
            };
            let mid = BranchInfo {
                tree_id: leaf.tree_id.clone(),
                branch_id: "mid".to_string(),
                ancestors: vec![BranchAncestor {
                    branch_id: "root".to_string(),
                    fork_node_id: 3,
                }],
            };
            for id in 1..=3 {
                seed_node(&pool, &leaf.tree_id, "root", id).await;
            }
            for id in 4..=8 {
                seed_node(&pool, &leaf.tree_id, "mid", id).await;
            }
            for id in 9..=11 {
                seed_node(&pool, &leaf.tree_id, "leaf", id).await;
            }
            seed_branch(&pool, &root).await;
            seed_branch(&pool, &mid).await;
            seed_branch(&pool, &leaf).await;

            // The leaf still forks off mid at 8: deleting mid must not
            // touch the 4..=8 range the leaf reads through.
            delete_branch(&pool, &mid).await.unwrap();

            let page = read_branch(&pool, &leaf, 1, 9999, 100, None).await.unwrap();
            let ids: Vec<i64> = deserialize_batches(&page.batches)
                .unwrap()
                .iter()
                .map(|e| e.event_id)
                .collect();
            assert_eq!(ids, (1..=11).collect::<Vec<i64>>());
            assert!(get_branch(&pool, &leaf.tree_id, "mid").await.is_ok());

            // Once the leaf is gone, nothing references mid and a second
            // delete removes its exclusive range and metadata for real.
            delete_branch(&pool, &leaf).await.unwrap();
            delete_branch(&pool, &mid).await.unwrap();

            let page = read_branch(&pool, &root, 1, 9999, 100, None).await.unwrap();
            let ids: Vec<i64> = deserialize_batches(&page.batches)
                .unwrap()
                .iter()
                .map(|e| e.event_id)
                .collect();
            assert_eq!(ids, (1..=3).collect::<Vec<i64>>());
            assert!(get_branch(&pool, &leaf.tree_id, "mid").await.is_err());

            clear_tree(&pool, &leaf.tree_id).await;
        }
    }
}
