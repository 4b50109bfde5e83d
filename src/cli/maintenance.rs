//! CLI maintenance command — run the decay / reflect / consolidate cycle once.

use anyhow::Result;

use mnema::config::MnemaConfig;
use mnema::db::now_ms;
use mnema::decay;
use mnema::engine::{run_consolidate, run_reflect};

/// Run one full maintenance cycle synchronously.
pub fn run(config: &MnemaConfig) -> Result<()> {
    let conn = mnema::db::open_database(config.resolved_db_path(), config.embedding.dim)?;

    println!("Applying salience decay...");
    let decay_result = decay::run_decay_batch(&conn, &config.decay, now_ms())?;
    if decay_result.updated > 0 {
        println!(
            "  Re-scored {} of {} records ({} skipped).",
            decay_result.updated, decay_result.scanned, decay_result.skipped,
        );
    } else {
        println!("  Nothing to decay.");
    }

    println!("Checking reflection triggers...");
    let flagged = run_reflect(&conn, &config.maintenance)?;
    if flagged > 0 {
        println!("  {flagged} tenant(s) flagged for reflection.");
    } else {
        println!("  No tenant over the reflection threshold.");
    }

    println!("Consolidating...");
    let consolidated = run_consolidate(&conn, config)?;
    if consolidated > 0 {
        println!("  Removed {consolidated} weak waypoint(s) / aged stat row(s).");
    } else {
        println!("  Nothing to consolidate.");
    }

    println!("Maintenance complete.");
    Ok(())
}
