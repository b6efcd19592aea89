use anyhow::{bail, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rollcall_core::{AttendanceOutcome, GalleryStore, Roster};
use rollcall_ledger::{report, AttendanceLedger};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod command_analyzer;
mod config;
mod engine;

use command_analyzer::CommandAnalyzer;
use config::Config;
use engine::GalleryInit;

#[derive(Parser)]
#[command(name = "rollcall", about = "Take class attendance from group photos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Take attendance from one or more class photos
    Take {
        /// Class photos, processed in order
        #[arg(required = true)]
        photos: Vec<PathBuf>,
        /// Attendance date (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Print the roster without saving it to the ledger
        #[arg(long)]
        no_record: bool,
    },
    /// Rebuild the gallery from the reference photos
    Rebuild,
    /// Show gallery status
    Status,
    /// List known students
    Students,
    /// Browse attendance history
    History {
        /// Show the roster stored for this date
        #[arg(short, long, conflicts_with = "student")]
        date: Option<NaiveDate>,
        /// Show one student's history
        #[arg(short, long)]
        student: Option<String>,
    },
    /// Summarize a stored day
    Report {
        date: NaiveDate,
        /// Include per-status names and recommendations
        #[arg(long)]
        detailed: bool,
        /// Also write the day as CSV, by default to a timestamped file beside the ledger
        #[arg(long, value_name = "PATH")]
        csv: Option<Option<PathBuf>>,
    },
    /// Aggregate attendance over a date range
    Summary {
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Delete every record for a date
    Delete { date: NaiveDate },
    /// Copy the ledger to a file
    Export { dest: Option<PathBuf> },
    /// Ledger statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_env("ROLLCALL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let config = Config::load()?;
    tracing::debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Take {
            photos,
            date,
            no_record,
        } => take(&config, photos, date, no_record).await?,
        Commands::Rebuild => {
            let (_store, handle) = start_engine(&config, GalleryInit::Skip)?;
            let rebuilt = handle.rebuild().await?;
            println!("Enrolled {} student(s)", rebuilt.enrolled.len());
            for skipped in &rebuilt.skipped {
                println!("  skipped {}: {}", skipped.file, skipped.reason);
            }
        }
        Commands::Status => {
            let store = snapshot_store(&config);
            println!("{}", serde_json::to_string_pretty(&store.status())?);
        }
        Commands::Students => {
            let store = snapshot_store(&config);
            let names = store.known_names();
            if names.is_empty() {
                println!("No students enrolled");
            }
            for name in names {
                println!("{name}");
            }
        }
        Commands::History { date, student } => {
            let ledger = AttendanceLedger::open(&config.ledger_path)?;
            if let Some(date) = date {
                for row in ledger.records_for_date(date)? {
                    println!(
                        "{:<28} {:<8} {:<14} {}",
                        row.name, row.status, row.confidence, row.timestamp
                    );
                }
            } else if let Some(student) = student {
                for row in ledger.student_history(&student)? {
                    println!("{}  {:<8} {}", row.date, row.status, row.confidence);
                }
            } else {
                for date in ledger.dates()? {
                    println!("{date}");
                }
            }
        }
        Commands::Report {
            date,
            detailed,
            csv,
        } => {
            let ledger = AttendanceLedger::open(&config.ledger_path)?;
            let rows = ledger.records_for_date(date)?;
            if rows.is_empty() {
                println!("No attendance data found for {date}");
                return Ok(());
            }
            if detailed {
                let detail = report::detailed_report(&rows, date);
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                println!("{}", report::summary_report(&rows, date).summary);
            }
            if let Some(dest) = csv {
                let path = ledger.export_report(date, dest.as_deref())?;
                println!("Wrote {}", path.display());
            }
        }
        Commands::Summary { from, to } => {
            let ledger = AttendanceLedger::open(&config.ledger_path)?;
            match ledger.summary(from, to)? {
                Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                None => println!("No attendance data in range"),
            }
        }
        Commands::Delete { date } => {
            let ledger = AttendanceLedger::open(&config.ledger_path)?;
            let removed = ledger.delete_date(date)?;
            println!("Deleted {removed} record(s) for {date}");
        }
        Commands::Export { dest } => {
            let ledger = AttendanceLedger::open(&config.ledger_path)?;
            let path = ledger.export(dest.as_deref())?;
            println!("Exported to {}", path.display());
        }
        Commands::Stats => {
            let ledger = AttendanceLedger::open(&config.ledger_path)?;
            println!("{}", serde_json::to_string_pretty(&ledger.stats()?)?);
        }
    }

    Ok(())
}

async fn take(
    config: &Config,
    photos: Vec<PathBuf>,
    date: Option<NaiveDate>,
    no_record: bool,
) -> Result<()> {
    let (_store, handle) = start_engine(config, GalleryInit::Load)?;
    let ledger = if no_record {
        None
    } else {
        Some(AttendanceLedger::open(&config.ledger_path)?)
    };
    let date = date.unwrap_or_else(|| Local::now().date_naive());

    for photo in photos {
        println!("== {}", photo.display());
        let outcome = handle.take_attendance(photo).await?;
        match &outcome {
            AttendanceOutcome::Taken(roster) => {
                print_roster(roster);
                if let Some(ledger) = &ledger {
                    ledger.record(date, &roster.records)?;
                }
            }
            _ => {
                if let Some(guidance) = outcome.guidance() {
                    println!("{guidance}");
                }
            }
        }
    }

    Ok(())
}

fn print_roster(roster: &Roster) {
    for r in &roster.records {
        println!("{:<28} {:<8} {}", r.name, r.status, r.confidence);
    }

    let s = &roster.summary;
    println!(
        "{} face(s) detected, {} present, {} absent, {} unknown, {} error(s)",
        s.faces_detected, s.present, s.absent, s.unknown, s.errored
    );
    for w in &s.warnings {
        println!("warning: {w}");
    }
    for e in &s.errors {
        println!("error: {e}");
    }
}

fn start_engine(
    config: &Config,
    init: GalleryInit,
) -> Result<(Arc<GalleryStore>, engine::EngineHandle)> {
    let Some(program) = config.analyzer_command.clone() else {
        bail!("no face analyzer configured; set ROLLCALL_ANALYZER_COMMAND or analyzer_command");
    };
    let analyzer = CommandAnalyzer::new(program, config.analyzer_args.clone());

    let store = Arc::new(GalleryStore::new(&config.reference_dir, &config.snapshot_path));
    let handle = engine::spawn_engine(Arc::clone(&store), Box::new(analyzer), config.policy, init)?;
    Ok((store, handle))
}

/// Store populated from the snapshot alone; no analyzer needed.
fn snapshot_store(config: &Config) -> GalleryStore {
    let store = GalleryStore::new(&config.reference_dir, &config.snapshot_path);
    if let Err(e) = store.load_snapshot() {
        tracing::warn!(error = %e, "gallery snapshot not loaded");
    }
    store
}
