//! Domain name and id resolution.
//!
//! Name lookups go through two table generations: `domains_by_name` first,
//! then `domains_by_name_v2` (partition 0). The fallback is a deliberate
//! compatibility shim for clusters whose domain records predate the v2
//! layout, so it triggers on a failed query as well as on an empty result.

use sqlx::{PgPool, Row};

use crate::error::{Error, Result};

/// Resolve a domain id to its name.
pub async fn domain_name_by_id(pool: &PgPool, domain_id: &str) -> Result<String> {
    let row = sqlx::query("SELECT name FROM domains WHERE id = $1")
        .bind(domain_id)
        .fetch_optional(pool)
        .await
        .map_err(Error::storage("domain_name_by_id"))?;

    match row {
        Some(row) => Ok(row.get("name")),
        None => Err(Error::NotFound {
            what: "domain",
            key: domain_id.to_string(),
        }),
    }
}

/// Resolve a domain name to its id, falling back to the v2 layout.
pub async fn domain_id_by_name(pool: &PgPool, name: &str) -> Result<String> {
    let v1 = sqlx::query("SELECT id FROM domains_by_name WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await;

    match v1 {
        Ok(Some(row)) => return Ok(row.get("id")),
        Ok(None) => {}
        Err(e) => {
            tracing::debug!(name, error = %e, "domains_by_name lookup failed, trying v2");
        }
    }

    let row = sqlx::query(
        r#"
        SELECT id FROM domains_by_name_v2
        WHERE domains_partition = 0
          AND name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await
    .map_err(Error::storage("domain_id_by_name"))?;

    match row {
        Some(row) => Ok(row.get("id")),
        None => Err(Error::NotFound {
            what: "domain",
            key: name.to_string(),
        }),
    }
}
