//! nftsync - incremental nftables table manager
//!
//! Command line front end for the `nftsync` library: builds a table from a
//! JSON description and renders or applies it.
//!
//! # Usage
//!
//! ```bash
//! nftsync render table.json              # Print the update script
//! nftsync render table.json --reload     # Print the reload script
//! nftsync render table.json --numbered   # With line numbers, as nft reports them
//! nftsync apply table.json               # Apply with the configured timeout
//! nftsync apply table.json --timeout 5   # Apply with a 5s timeout
//! nftsync reload table.json              # Delete and recreate the table
//! nftsync probe                          # Check that nft can be found
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use nftsync::audit::{self, EventType};
use nftsync::config::{self, Settings};
use nftsync::core::description::TableDescription;
use nftsync::core::error::NftablesErrorPattern;
use nftsync::core::probe;
use nftsync::core::script::{number_lines, reload_script, update_script};
use nftsync::{ApplyReport, Error, Table};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nftsync")]
#[command(about = "Incremental nftables table manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the script that applying a table description would run
    Render {
        /// Path to a JSON table description
        file: PathBuf,
        /// Print the delete-and-recreate script instead
        #[arg(long)]
        reload: bool,
        /// Prefix each line with its number
        #[arg(long)]
        numbered: bool,
    },
    /// Apply a table description to the kernel
    Apply {
        /// Path to a JSON table description
        file: PathBuf,
        /// Give up after this many seconds (default from config, max: 3600)
        #[arg(short, long, value_name = "SECONDS")]
        timeout: Option<u64>,
    },
    /// Delete the table and recreate it from a description
    Reload {
        /// Path to a JSON table description
        file: PathBuf,
    },
    /// Report whether nft is available
    Probe,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create Tokio runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(handle_cli(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

async fn handle_cli(command: Commands) -> Result<(), Error> {
    let settings = config::load_settings().await;
    match command {
        Commands::Render {
            file,
            reload,
            numbered,
        } => {
            let table = load_table(&file).await?;
            let script = if reload {
                reload_script(&table)
            } else {
                update_script(&table)
            };
            if numbered {
                print!("{}", number_lines(&script));
            } else {
                print!("{script}");
            }
        }
        Commands::Apply { file, timeout } => {
            let mut table = load_table(&file).await?;
            enable(&settings)?;
            let timeout = timeout.map_or_else(
                || settings.apply_timeout(),
                |secs| Duration::from_secs(secs.clamp(1, config::MAX_APPLY_TIMEOUT_SECS)),
            );
            let result = table.apply_with_timeout(timeout).await;
            record(&settings, EventType::ApplyTable, &table, &result).await;
            print_report(&result?);
            println!("✓ Table {} {} applied.", table.family(), table.name());
        }
        Commands::Reload { file } => {
            let mut table = load_table(&file).await?;
            enable(&settings)?;
            let timeout = settings.apply_timeout();
            let result = tokio::time::timeout(timeout, table.reload())
                .await
                .unwrap_or(Err(Error::TimedOut(timeout)));
            record(&settings, EventType::ReloadTable, &table, &result).await;
            print_report(&result?);
            println!("✓ Table {} {} reloaded.", table.family(), table.name());
        }
        Commands::Probe => {
            if enable(&settings).is_ok() {
                let nft = probe::nft()?;
                println!("nft available at {}", nft.path().display());
            } else {
                let reason = probe::enable_error().unwrap_or_default();
                return Err(Error::NotEnabled(reason));
            }
        }
    }
    Ok(())
}

async fn load_table(file: &std::path::Path) -> Result<Table, Error> {
    TableDescription::load(file).await?.build()
}

fn enable(settings: &Settings) -> Result<(), Error> {
    if !probe::enable_with(&settings.nft_config()) {
        return Err(Error::NotEnabled(
            probe::enable_error().unwrap_or_else(|| "nft not available".to_string()),
        ));
    }
    if !nix::unistd::getuid().is_root() {
        println!("Note: Not running as root. nft will likely need CAP_NET_ADMIN.");
    }
    Ok(())
}

async fn record(
    settings: &Settings,
    event_type: EventType,
    table: &Table,
    result: &Result<ApplyReport, Error>,
) {
    if !settings.audit {
        return;
    }
    if let Err(e) = nftsync::utils::ensure_dirs() {
        tracing::warn!("Failed to create state directory: {}", e);
        return;
    }
    let (lines, error) = match result {
        Ok(report) => (report.script.lines().count(), None),
        Err(e) => (0, Some(e.to_string())),
    };
    audit::log_table_event(
        event_type,
        table.family().as_ref(),
        table.name(),
        lines,
        error,
    )
    .await;
}

fn print_report(report: &ApplyReport) {
    let stdout = report.stdout.trim();
    if !stdout.is_empty() {
        println!("{stdout}");
    }
    let stderr = report.stderr.trim();
    if !stderr.is_empty() {
        eprintln!("{stderr}");
    }
}

fn report_error(error: &Error) {
    eprintln!("Error: {error}");
    let Some(failure) = error.apply_failure() else {
        return;
    };
    let translation = NftablesErrorPattern::match_error(&failure.stderr);
    eprintln!("{}", translation.user_message);
    // The numbered script is already in the error log
    for suggestion in &translation.suggestions {
        eprintln!("  - {suggestion}");
    }
}
