//! listsync CLI
//!
//! Runs the sync server and inspects its data directory.
//!
//! # Commands
//!
//! - `serve` - Run the HTTP and live sync server
//! - `inspect` - List stored workspaces or show one in detail
//! - `verify` - Check every stored workspace document

mod commands;

use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// listsync sync server and maintenance tools.
#[derive(Parser)]
#[command(name = "listsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding workspace documents
    #[arg(global = true, short, long, env = "LISTSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync server
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "PORT", default_value = "3000")]
        port: u16,

        /// Address to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: IpAddr,

        /// Per-delivery notification timeout in milliseconds
        #[arg(long, default_value = "5000")]
        notify_timeout_ms: u64,

        /// Maximum lists or items accepted in one sync
        #[arg(long, default_value = "10000")]
        max_batch: usize,
    },

    /// List stored workspaces, or show one
    Inspect {
        /// Workspace id or pairing code to show
        workspace: Option<String>,

        /// Include tombstones when showing a workspace
        #[arg(short, long)]
        tombstones: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every stored workspace document
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            port,
            host,
            notify_timeout_ms,
            max_batch,
        } => {
            let options = commands::serve::ServeOptions {
                host,
                port,
                data_dir: cli.data_dir,
                notify_timeout_ms,
                max_batch,
            };
            commands::serve::run(options)?;
        }
        Commands::Inspect {
            workspace,
            tombstones,
            format,
        } => {
            let path = cli.data_dir.ok_or("Data directory required for inspect")?;
            commands::inspect::run(&path, workspace.as_deref(), tombstones, &format)?;
        }
        Commands::Verify => {
            let path = cli.data_dir.ok_or("Data directory required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("listsync v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
