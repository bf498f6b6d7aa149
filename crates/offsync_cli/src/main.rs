//! offsync CLI
//!
//! Command-line tools for offsync state directories.
//!
//! # Commands
//!
//! - `jobs` - List background jobs and their run history
//! - `enable` / `disable` - Toggle a background job
//! - `reset` - Clear a job's run history
//! - `simulate` - Run one sync cycle against in-memory stores

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// offsync command-line tools.
#[derive(Parser)]
#[command(name = "offsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding persisted sync state
    #[arg(global = true, short, long, default_value = ".offsync")]
    state_dir: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List background jobs and their run history
    Jobs {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Enable a background job (refresh, maintenance)
    Enable {
        /// Job name
        job: String,
    },

    /// Disable a background job (refresh, maintenance)
    Disable {
        /// Job name
        job: String,
    },

    /// Clear a job's run history
    Reset {
        /// Job name
        job: String,
    },

    /// Run one sync cycle against in-memory stores
    Simulate {
        /// Records to create before syncing
        #[arg(short, long, default_value = "120")]
        records: usize,

        /// Upload batch size
        #[arg(short, long, default_value = "50")]
        batch_size: usize,

        /// Commits to fail before the remote recovers
        #[arg(long, default_value = "0")]
        fail_first: usize,

        /// Entity type of the created records
        #[arg(short, long, default_value = "notes")]
        entity_type: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Jobs { format } => {
            commands::jobs::list(&cli.state_dir, &format)?;
        }
        Commands::Enable { job } => {
            commands::jobs::set_enabled(&cli.state_dir, &job, true)?;
        }
        Commands::Disable { job } => {
            commands::jobs::set_enabled(&cli.state_dir, &job, false)?;
        }
        Commands::Reset { job } => {
            commands::jobs::reset(&cli.state_dir, &job)?;
        }
        Commands::Simulate {
            records,
            batch_size,
            fail_first,
            entity_type,
            format,
        } => {
            let sim = commands::simulate::Simulation {
                records,
                batch_size,
                fail_first,
                entity_type,
            };
            commands::simulate::run(sim, &format).await?;
        }
        Commands::Version => {
            println!("offsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
