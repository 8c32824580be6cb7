use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Local;
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use partsnap::adapters::{
    BlockImage, Blake3Manifest, ConsoleReporter, Formatter, SystemMounts, TreeArchive,
};
use partsnap::config::AppConfig;
use partsnap::context::{Backends, RunOptions};
use partsnap::core::{
    BackupOrchestrator, FstabGenerator, PartitionSelection, Report, Reporter, RestoreOrchestrator,
    VolumeTable,
};
use partsnap::logging::{self, LogConfig};

const USAGE: &str = "Usage: partsnap backup\nUsage: partsnap restore <directory>";

#[derive(Parser)]
#[command(name = "partsnap")]
#[command(about = "Back up and restore device partitions to removable media", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to /etc/partsnap/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up every partition into a new timestamped set.
    Backup,
    /// Restore a backup set.
    Restore { directory: PathBuf },
}

/// Flags layered over the configuration file and environment.
#[derive(Args, Serialize)]
struct Overrides {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, global = true)]
    verbose: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    #[arg(long, global = true)]
    json_logs: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    media_root: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    device_serial: Option<String>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(_) => {
            eprintln!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::new(Some(&cli.overrides), cli.config.as_deref())
        .context("Failed to load configuration")?;

    let log_guard = logging::init(LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
        file: Some(config.log_file()),
    });

    let table = VolumeTable::load(&config.volume_table).with_context(|| {
        format!("Failed to read volume table {}", config.volume_table.display())
    })?;

    let reporter = ConsoleReporter::default();
    let mounts = SystemMounts::new(&table, &config.by_name_dir, &config.mounts_file);
    let raw = BlockImage::default();
    let tree = TreeArchive;
    let format = Formatter::new(&table, &mounts, &config.by_name_dir);
    let checksum = Blake3Manifest;

    if let Some(output) = &config.fstab_output {
        match FstabGenerator::new(&table, &config.by_name_dir).write(output) {
            Ok(count) => info!(path = %output.display(), entries = count, "Wrote fstab"),
            Err(e) => warn!(path = %output.display(), error = %e, "Failed to write fstab"),
        }
    }

    let extended = config.extended_command();
    if let Some(staged) = extended
        .stage(&mounts, &reporter)
        .context("Failed to stage extended command")?
    {
        reporter.print(&format!("Extended command staged at {}", staged.display()));
    }

    let backends = Backends {
        registry: &table,
        mounts: &mounts,
        raw: &raw,
        tree: &tree,
        format: &format,
        checksum: &checksum,
        reporter: &reporter,
    };
    let options = RunOptions::from_config(&config);

    let result = match cli.command {
        Commands::Backup => {
            let stamp = Local::now().format("%F.%H.%M.%S").to_string();
            let target = config.backup_root().join(stamp);
            BackupOrchestrator::new(backends, options).backup(&target)
        }
        Commands::Restore { directory } => RestoreOrchestrator::new(backends, options)
            .restore(&directory, PartitionSelection::standard()),
    };

    Ok(match result {
        Ok(report) => {
            summarize(&report);
            ExitCode::SUCCESS
        }
        Err(e) => {
            // Flush the session log before copying it.
            drop(log_guard);
            if let Err(copy) = config.failure_log().preserve(&mounts, &reporter) {
                eprintln!("Failed to copy the log to the media: {}", copy);
            }
            exit_code(e.exit_status())
        }
    })
}

fn summarize(report: &Report) {
    info!(
        directory = %report.directory.display(),
        completed = ?report.completed(),
        skipped = ?report.skipped(),
        advisories = report.advisories.len(),
        "Run finished"
    );
    for advisory in &report.advisories {
        warn!(?advisory, "Advisory");
    }
}

fn exit_code(status: i32) -> ExitCode {
    ExitCode::from(exit_status(status))
}

/// Statuses outside 1..=255 collapse to 1.
fn exit_status(status: i32) -> u8 {
    u8::try_from(status).ok().filter(|s| *s != 0).unwrap_or(1)
}
