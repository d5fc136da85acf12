use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use sierra_sync::core::{setup_logging, SyncConfig};
use sierra_sync::sync::{
    run_sync, DataRootLocator, LocatorError, RunStatus, SyncError, SyncRequest, UtcClock,
};

#[derive(Debug, Parser)]
#[command(name = "sierra-sync", version, about = "Sierra trade/depth matcher")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Align the trade and depth files for a symbol and UTC day
    Sync {
        /// Symbol root, e.g. ES, MES, NQ
        symbol: String,
        /// Trading day, YYYY-MM-DD
        date: NaiveDate,
        /// Optional JSON settings file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Plan only; do not write outputs
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the effective configuration and check the data roots
    Doctor {
        /// Optional JSON settings file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.cmd {
        Command::Doctor { config } => {
            let cfg = SyncConfig::load(config.as_deref())?;
            setup_logging(Some(&cfg.log_level), false);
            cfg.validate()?;

            println!("config.scid_root       = {}", cfg.scid_root.display());
            println!("config.depth_root      = {}", cfg.depth_root.display());
            println!("config.logs_root       = {}", cfg.logs_root.display());
            println!("config.contract_suffix = {}", cfg.contract_suffix);
            println!("config.log_level       = {}", cfg.log_level);

            let mut ok = true;
            for (name, root) in [("scid_root", &cfg.scid_root), ("depth_root", &cfg.depth_root)] {
                if root.exists() {
                    println!("{name}: ok");
                } else {
                    println!("{name}: MISSING ({})", root.display());
                    ok = false;
                }
            }
            Ok(if ok { ExitCode::SUCCESS } else { ExitCode::from(2) })
        }

        Command::Sync {
            symbol,
            date,
            config,
            dry_run,
        } => {
            let cfg = SyncConfig::load(config.as_deref())?;
            setup_logging(Some(&cfg.log_level), false);
            cfg.validate()?;

            let locator = DataRootLocator::from_config(&cfg);
            let req = SyncRequest {
                symbol,
                day: date,
                dry_run,
                run_id: Some(Utc::now().format("%Y%m%d-%H%M%S").to_string()),
            };

            match run_sync(&cfg, &locator, &UtcClock, &req) {
                Ok(report) => {
                    if dry_run {
                        println!("Plan for {}:", report.paths.stem);
                        println!("  scid in:   {}", report.paths.scid_in.display());
                        println!("  depth in:  {}", report.paths.depth_in.display());
                        println!("  scid out:  {}", report.paths.scid_out.display());
                        println!("  depth out: {}", report.paths.depth_out.display());
                        return Ok(ExitCode::SUCCESS);
                    }
                    println!("{}", report);
                    match report.status {
                        RunStatus::Complete | RunStatus::PartiallyComplete(_) => {
                            Ok(ExitCode::SUCCESS)
                        }
                        RunStatus::Failed(_) => Ok(ExitCode::FAILURE),
                    }
                }
                Err(SyncError::Locator(LocatorError::ScidMissing(path))) => {
                    eprintln!("{}", RunStatus::Failed(format!("scid missing: {}", path.display())));
                    Ok(ExitCode::from(3))
                }
                Err(SyncError::Locator(LocatorError::DepthMissing(path))) => {
                    eprintln!("{}", RunStatus::Failed(format!("depth missing: {}", path.display())));
                    Ok(ExitCode::from(4))
                }
                Err(e) => {
                    eprintln!("{}", RunStatus::Failed(e.to_string()));
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}
