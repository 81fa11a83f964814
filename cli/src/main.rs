//! Operational entry points for the attendance engine.
//!
//! `pointage auto-create-absences` is the cron-invoked batch trigger;
//! `pointage export-devices` dumps a tenant's device directory for
//! verification against the vendor console.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use log::warn;
use tokio_util::sync::CancellationToken;

use common::config::Config;
use common::logger::init_logger;
use services::batch::{self, BatchOutcome, BatchParams, SourceFactory};
use services::catalog::SessionTypeFilter;
use services::clock::CampusClock;
use services::device_directory;
use services::punch;
use services::tenant::TenantDirectory;

#[derive(Parser, Debug)]
#[command(version, about = "Attendance reconciliation operations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile finished sessions across all tenants and materialize
    /// absence records. Safe to re-run; re-runs correct in place.
    AutoCreateAbsences {
        /// Hours after session end before a punch-less student is absent
        #[arg(long, default_value_t = 1)]
        hours: i64,
        /// Backfill: process every session of this date, ignoring the cutoff
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Which session kinds to process
        #[arg(long = "type", value_enum, default_value_t = TypeArg::Both)]
        session_type: TypeArg,
    },
    /// Dump a tenant's device directory as CSV rows
    ExportDevices {
        tenant_id: String,
        /// Output path; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum TypeArg {
    Course,
    Exam,
    Both,
}

impl From<TypeArg> for SessionTypeFilter {
    fn from(value: TypeArg) -> Self {
        match value {
            TypeArg::Course => SessionTypeFilter::Course,
            TypeArg::Exam => SessionTypeFilter::Exam,
            TypeArg::Both => SessionTypeFilter::Both,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = Config::init();
    init_logger(&config.log_level, &config.log_file);

    let result = match cli.command {
        Command::AutoCreateAbsences {
            hours,
            date,
            session_type,
        } => auto_create_absences(config, hours, date, session_type.into()).await,
        Command::ExportDevices { tenant_id, output } => {
            export_devices(config, &tenant_id, output).await.map(|_| ExitCode::SUCCESS)
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn auto_create_absences(
    config: &Config,
    hours: i64,
    date: Option<NaiveDate>,
    type_filter: SessionTypeFilter,
) -> Result<ExitCode> {
    let directory = TenantDirectory::from_file(&config.tenants_file)
        .context("loading tenant registry")?;
    if directory.is_empty() {
        eprintln!("tenant registry is empty, nothing to do");
        return Ok(ExitCode::FAILURE);
    }
    let clock = CampusClock::new(&config.campus_timezone).context("campus timezone")?;

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current session then stopping");
            signal_cancel.cancel();
        }
    });

    let params = BatchParams {
        cutoff_hours: hours,
        date_override: date,
        type_filter,
    };
    let factory: &SourceFactory = &punch::http_source_factory;
    let outcome = batch::run_batch(&directory, &clock, &params, Utc::now(), &cancel, factory).await;

    print_outcome(&outcome);

    if outcome.all_unavailable() {
        Ok(ExitCode::FAILURE)
    } else if outcome.any_unavailable() {
        // Partial result: absences were created where possible, but at least
        // one tenant was skipped this run.
        Ok(ExitCode::from(2))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_outcome(outcome: &BatchOutcome) {
    for tenant in &outcome.tenants {
        let marker = if tenant.available { "" } else { "  [UNAVAILABLE]" };
        println!(
            "{:<16} sessions {:>4}  created {:>5}  updated {:>5}  errors {:>3}{}",
            tenant.tenant,
            tenant.sessions_processed,
            tenant.created,
            tenant.updated,
            tenant.errors,
            marker
        );
        for warning in &tenant.warnings {
            println!("  warning: {warning}");
        }
    }
    println!(
        "total: created {}  updated {}",
        outcome.total_created, outcome.total_updated
    );
}

async fn export_devices(
    config: &Config,
    tenant_id: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let directory = TenantDirectory::from_file(&config.tenants_file)
        .context("loading tenant registry")?;
    if directory.get(tenant_id).is_none() {
        anyhow::bail!("tenant '{tenant_id}' not found in registry");
    }

    let db = directory
        .connect(tenant_id)
        .await
        .with_context(|| format!("connecting to tenant '{tenant_id}'"))?;
    let rows = device_directory::export_rows(&db)
        .await
        .context("reading device directory")?;

    let mut text = String::from("device_id,device_name,room\n");
    for row in &rows {
        text.push_str(&format!(
            "{},{},{}\n",
            row.device_id,
            row.device_name,
            row.room.as_deref().unwrap_or("")
        ));
    }

    match output {
        Some(path) => {
            fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("exported {} device(s) to {}", rows.len(), path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}
