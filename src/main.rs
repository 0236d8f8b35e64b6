// src/main.rs
//! wheelhouse - PyPI mirror replicator - CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

use wheelhouse::Error;

/// Default configuration file location
const DEFAULT_CONFIG: &str = "/etc/wheelhouse.conf";

#[derive(Parser)]
#[command(name = "wheelhouse")]
#[command(version)]
#[command(about = "Mirror a PyPI-compatible package index onto local storage", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Turn on debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full replication pass against the upstream index
    Mirror {
        /// Clear the status cursor first, forcing a complete re-diff
        #[arg(long)]
        force_check: bool,
    },

    /// Reconcile on-disk state against authoritative metadata
    Verify {
        /// Remove projects that upstream no longer knows
        #[arg(long)]
        delete: bool,

        /// Also refresh the local JSON metadata
        #[arg(long)]
        json_update: bool,

        /// Report what would change without touching the mirror
        #[arg(long)]
        dry_run: bool,
    },

    /// Sync the named project(s) once, without advancing the cursor
    Sync {
        /// Project name(s) to sync
        #[arg(required = true)]
        projects: Vec<String>,
    },

    /// Remove the named project(s) and their files from the mirror
    Delete {
        /// Project name(s) to delete
        #[arg(required = true)]
        projects: Vec<String>,

        /// Show what would be removed without removing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let result = match cli.command {
        Commands::Mirror { force_check } => commands::cmd_mirror(&cli.config, force_check).await,

        Commands::Verify {
            delete,
            json_update,
            dry_run,
        } => commands::cmd_verify(&cli.config, delete, json_update, dry_run).await,

        Commands::Sync { projects } => commands::cmd_sync(&cli.config, &projects).await,

        Commands::Delete { projects, dry_run } => {
            commands::cmd_delete(&cli.config, &projects, dry_run).await
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "wheelhouse", &mut io::stdout());
            return ExitCode::SUCCESS;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("wheelhouse: {e}");
            exit_code(&e)
        }
    }
}

fn exit_code(e: &Error) -> ExitCode {
    ExitCode::from(e.exit_code() as u8)
}
