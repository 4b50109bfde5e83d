mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnema::config::MnemaConfig;

#[derive(Parser)]
#[command(name = "mnema", version, about = "Associative memory engine for AI agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show store statistics
    Stats,
    /// Query memories from the command line
    Search {
        /// Query text
        query: String,
        /// Max results
        #[arg(short, long, default_value_t = 8)]
        k: usize,
        /// Tenant scope (omit for global records)
        #[arg(short, long)]
        tenant: Option<String>,
    },
    /// Run the maintenance cycle (decay, reflect, consolidate) once
    Maintain,
    /// Check database health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let config = MnemaConfig::load()?;

    // Initialize tracing with the configured log level, on stderr.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Stats => cli::stats::run(&config)?,
        Command::Search { query, k, tenant } => {
            cli::search::run(&config, &query, k, tenant.as_deref())?
        }
        Command::Maintain => cli::maintenance::run(&config)?,
        Command::Doctor => cli::doctor::run(&config)?,
    }

    Ok(())
}
