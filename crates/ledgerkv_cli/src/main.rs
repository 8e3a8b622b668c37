//! LedgerKV CLI
//!
//! Command-line tools for the LedgerKV client.
//!
//! # Commands
//!
//! - `evidence list` - List transactions with stored evidence
//! - `evidence show` - Display a stored envelope and its receipt
//! - `evidence verify` - Check signatures and receipts of stored evidence
//! - `demo` - Run a demo scenario against an in-process replica

mod commands;

use clap::{Parser, Subcommand};
use commands::demo::Scenario;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// LedgerKV command-line tools.
#[derive(Parser)]
#[command(name = "ledgerkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the evidence directory
    #[arg(global = true, short, long)]
    dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and verify stored transaction evidence
    Evidence {
        #[command(subcommand)]
        command: EvidenceCommand,
    },

    /// Run a demo scenario against an in-process replica
    Demo {
        /// Scenario to run
        #[arg(value_enum)]
        scenario: Scenario,

        /// Client configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum EvidenceCommand {
    /// List transactions with stored evidence
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display the envelope and receipt of a transaction
    Show {
        /// Transaction id
        #[arg(short, long)]
        tx: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify signatures and receipts
    Verify {
        /// Transaction id (all stored transactions if omitted)
        #[arg(short, long)]
        tx: Option<String>,

        /// Signing key of a user, as USER=KEY_FILE
        #[arg(short, long = "key")]
        keys: Vec<String>,

        /// Trust the keys of the demo users
        #[arg(long)]
        demo_keys: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Evidence { command } => {
            let dir = cli.dir.ok_or("Evidence directory required (--dir)")?;
            match command {
                EvidenceCommand::List { format } => commands::evidence::list(&dir, &format)?,
                EvidenceCommand::Show { tx, format } => {
                    commands::evidence::show(&dir, &tx, &format)?
                }
                EvidenceCommand::Verify {
                    tx,
                    keys,
                    demo_keys,
                } => commands::evidence::verify(&dir, tx.as_deref(), &keys, demo_keys)?,
            }
        }
        Commands::Demo { scenario, config } => {
            commands::demo::run(scenario, cli.dir.as_deref(), config.as_deref())?;
        }
        Commands::Version => {
            println!("LedgerKV CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "LedgerKV protocol v{}",
                ledgerkv_protocol::PROTOCOL_VERSION
            );
        }
    }

    Ok(())
}
