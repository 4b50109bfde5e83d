//! Associative waypoint graph — "this memory led to that memory."
//!
//! Directed, weighted edges scoped per tenant. The table is keyed by
//! `(source_id, tenant)`: linking from the same source under the same tenant
//! replaces the destination, so each row is the source's latest successor.
//! The unscoped [`edges_from`] query exposes the fan-out across tenants.
//!
//! Tenant filtering in [`neighbors`] is load-bearing for multi-tenant
//! correctness: a query scoped to tenant T must never see another tenant's
//! edges, even when ids collide across tenants.

use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::{MemoryError, Result};

/// A directed waypoint edge, matching the `waypoints` table schema.
#[derive(Debug, Clone, Serialize)]
pub struct Waypoint {
    pub source_id: String,
    pub dest_id: String,
    pub tenant: Option<String>,
    /// Association strength in `[0, 1]`.
    pub weight: f64,
    pub created_at: i64,
    pub updated_at: i64,
}

fn row_to_waypoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Waypoint> {
    Ok(Waypoint {
        source_id: row.get(0)?,
        tenant: row.get(1)?,
        dest_id: row.get(2)?,
        weight: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const WAYPOINT_COLUMNS: &str = "source_id, tenant, dest_id, weight, created_at, updated_at";

/// Upsert the edge for `(source, tenant)`. An existing row keeps its
/// `created_at`; destination, weight, and `updated_at` are replaced.
pub fn link(
    conn: &Connection,
    source_id: &str,
    dest_id: &str,
    tenant: Option<&str>,
    weight: f64,
    now: i64,
) -> Result<()> {
    let weight = weight.clamp(0.0, 1.0);

    // Manual upsert: tenant may be NULL, which ON CONFLICT cannot key on.
    let updated = conn.execute(
        "UPDATE waypoints SET dest_id = ?1, weight = ?2, updated_at = ?3 \
         WHERE source_id = ?4 AND tenant IS ?5",
        params![dest_id, weight, now, source_id, tenant],
    )?;
    if updated == 0 {
        conn.execute(
            "INSERT INTO waypoints (source_id, tenant, dest_id, weight, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![source_id, tenant, dest_id, weight, now],
        )?;
    }
    Ok(())
}

/// Destinations reachable from `source` under `tenant`, weight-descending.
pub fn neighbors(
    conn: &Connection,
    source_id: &str,
    tenant: Option<&str>,
) -> Result<Vec<Waypoint>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {WAYPOINT_COLUMNS} FROM waypoints \
         WHERE source_id = ?1 AND tenant IS ?2 ORDER BY weight DESC",
    ))?;
    let edges = stmt
        .query_map(params![source_id, tenant], row_to_waypoint)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    // Isolation invariant: a scoped query leaking another tenant's edge is a
    // programming error and must fail loudly, not return quietly.
    for edge in &edges {
        if edge.tenant.as_deref() != tenant {
            return Err(MemoryError::TenantViolation(format!(
                "neighbors({source_id}) scoped to {tenant:?} produced edge owned by {:?}",
                edge.tenant
            )));
        }
    }
    Ok(edges)
}

/// Every edge leaving `source`, across all tenants, most recent first.
pub fn edges_from(conn: &Connection, source_id: &str) -> Result<Vec<Waypoint>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {WAYPOINT_COLUMNS} FROM waypoints \
         WHERE source_id = ?1 ORDER BY updated_at DESC",
    ))?;
    let edges = stmt
        .query_map(params![source_id], row_to_waypoint)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(edges)
}

/// Adjust the weight of an existing edge. Fails with
/// [`MemoryError::NotFound`] if no `(source, dest)` edge exists.
pub fn reweight(
    conn: &Connection,
    source_id: &str,
    dest_id: &str,
    weight: f64,
    now: i64,
) -> Result<()> {
    let rows = conn.execute(
        "UPDATE waypoints SET weight = ?1, updated_at = ?2 \
         WHERE source_id = ?3 AND dest_id = ?4",
        params![weight.clamp(0.0, 1.0), now, source_id, dest_id],
    )?;
    if rows == 0 {
        return Err(MemoryError::NotFound(format!(
            "waypoint {source_id} -> {dest_id}"
        )));
    }
    Ok(())
}

/// Delete every edge below `weight_threshold`. Maintenance-only bulk
/// operation; irreversible. Returns the number pruned.
pub fn prune(conn: &Connection, weight_threshold: f64) -> Result<usize> {
    let rows = conn.execute(
        "DELETE FROM waypoints WHERE weight < ?1",
        params![weight_threshold],
    )?;
    Ok(rows)
}

/// Remove every edge where `id` is source or destination. Used on record
/// deletion. Returns the number removed.
pub fn unlink_all(conn: &Connection, id: &str) -> Result<usize> {
    let rows = conn.execute(
        "DELETE FROM waypoints WHERE source_id = ?1 OR dest_id = ?1",
        params![id],
    )?;
    Ok(rows)
}
