//! relcrm command-line entry point.
//!
//! # Responsibility
//! - Load configuration and logging once, then dispatch one subcommand.
//! - Print results as JSON so output can be piped into other tools.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use relcrm_core::db::open_db_with_lock_wait;
use relcrm_core::{
    core_version, init_logging, CrmConfig, DuplicateScanService, FieldCodec, MergeCoordinator,
    SimilarityScorer, SqliteClientRepository, TimelineService,
};
use rusqlite::Connection;
use secrecy::ExposeSecret;
use serde_json::to_string_pretty;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "relcrm", version, about = "Client relationship records with duplicate merge")]
struct Cli {
    /// Optional TOML config file; `RELCRM_*` variables override it.
    #[arg(long, global = true, env = "RELCRM_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API on the configured bind address.
    Serve,
    /// Report duplicate client groups for one user.
    Scan {
        #[arg(long)]
        user: Uuid,
    },
    /// Merge `lose` into `keep`.
    Merge {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        keep: Uuid,
        #[arg(long)]
        lose: Uuid,
    },
    /// Activity counts by type over the last `days`.
    Stats {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        days: Option<u32>,
    },
    /// Print a fresh base64 encryption key.
    Keygen,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if matches!(cli.command, Command::Keygen) {
        println!("{}", FieldCodec::generate_key().expose_secret());
        return Ok(());
    }

    let config = CrmConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let logging = config.logging_options()?;
    init_logging(&logging).map_err(|err| anyhow!("failed to initialize logging: {err}"))?;
    info!(
        "event=cli_start module=cli status=ok version={} command={:?}",
        core_version(),
        cli.command
    );

    match cli.command {
        Command::Serve => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
            runtime.block_on(relcrm_server::serve(&config))?;
        }
        Command::Scan { user } => {
            let codec = config.build_codec()?;
            let conn = open(&config)?;
            let report = DuplicateScanService::new(
                &conn,
                user,
                &codec,
                SimilarityScorer::new(config.scorer_config()),
                config.scan_options(),
            )
            .detect()
            .map_err(|err| anyhow!("{}: {err}", err.code()))?;
            println!("{}", to_string_pretty(&report)?);
        }
        Command::Merge { user, keep, lose } => {
            let codec = config.build_codec()?;
            let conn = open(&config)?;
            let outcome = MergeCoordinator::new(&conn, user, &codec)
                .merge(keep, lose)
                .map_err(|err| anyhow!("{}: {err}", err.code()))?;
            println!("{}", to_string_pretty(&outcome)?);
        }
        Command::Stats { user, days } => {
            let codec = config.build_codec()?;
            let conn = open(&config)?;
            let stats = TimelineService::new(SqliteClientRepository::new(&conn, user, &codec))
                .activity_stats(days)
                .map_err(|err| anyhow!("{}: {err}", err.code()))?;
            println!("{}", to_string_pretty(&stats)?);
        }
        // Handled before configuration loads.
        Command::Keygen => {}
    }
    Ok(())
}

fn open(config: &CrmConfig) -> Result<Connection> {
    open_db_with_lock_wait(&config.database_path, config.lock_wait()).with_context(|| {
        format!(
            "failed to open database at {}",
            config.database_path.display()
        )
    })
}
