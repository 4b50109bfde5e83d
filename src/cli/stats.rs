use anyhow::Result;

use mnema::config::MnemaConfig;
use mnema::record::types::Sector;
use mnema::scheduler::recent_stats;

/// Display store statistics in the terminal.
pub fn run(config: &MnemaConfig) -> Result<()> {
    let conn = mnema::db::open_database(config.resolved_db_path(), config.embedding.dim)?;

    let total: i64 = conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
    let tenants: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT tenant) FROM records WHERE tenant IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let vectors: i64 = conn.query_row("SELECT COUNT(*) FROM vectors", [], |r| r.get(0))?;
    let waypoints: i64 = conn.query_row("SELECT COUNT(*) FROM waypoints", [], |r| r.get(0))?;
    let facts: i64 = conn.query_row("SELECT COUNT(*) FROM temporal_facts", [], |r| r.get(0))?;

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    println!("  Records:             {total}");
    println!("  Tenants:             {tenants}");
    println!();

    println!("By Sector:");
    for sector in Sector::ALL {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE sector = ?1",
            [sector.as_str()],
            |r| r.get(0),
        )?;
        println!("  {:<12} {}", sector.as_str(), count);
    }
    println!();

    println!("Vector entries:        {vectors}");
    println!("Waypoints:             {waypoints}");
    println!("Temporal facts:        {facts}");

    let recent = recent_stats(&conn, 10)?;
    if !recent.is_empty() {
        println!();
        println!("Recent maintenance runs:");
        for (task, count, created_at) in recent {
            println!("  {task:<12} count={count} at={created_at}");
        }
    }

    Ok(())
}
