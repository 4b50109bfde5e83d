use anyhow::Result;
use std::sync::Arc;

use mnema::config::MnemaConfig;
use mnema::embedding;
use mnema::engine::{MemoryEngine, QueryFilters};

/// Query memories from the command line and print the ranked results.
pub fn run(config: &MnemaConfig, query: &str, k: usize, tenant: Option<&str>) -> Result<()> {
    let provider = embedding::create_provider(&config.embedding)?;
    let engine = MemoryEngine::open(config.clone(), Arc::from(provider))?;

    let filters = QueryFilters {
        tenant: tenant.map(String::from),
        ..Default::default()
    };
    let matches = engine.query_memory(query, k, &filters)?;

    if matches.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    for m in &matches {
        let preview: String = m.record.content.chars().take(80).collect();
        let via = if m.via.is_empty() {
            String::new()
        } else {
            format!("  (via {})", m.via.join(" -> "))
        };
        println!(
            "{:.3}  [{}] {}  {}{}",
            m.score,
            m.record.sector.as_str(),
            m.record.id,
            preview,
            via
        );
    }
    println!("\n{} result(s)", matches.len());

    Ok(())
}
