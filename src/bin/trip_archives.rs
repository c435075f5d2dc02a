//! Trip Archives - inspect and upload finalized trips
//!
//! Usage:
//!   trip-archives list                      # every archive, newest first
//!   trip-archives list --owner eddy@example.com
//!   trip-archives show tripLocations_eddy_2020-10-27_08:00:00_to_2020-10-27_08:30:00.json
//!   trip-archives upload --owner eddy@example.com
//!
//! Reads the storage directory and remote store from the same config file as
//! the recorder.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use trip_recorder::domain::{ArchiveKind, ArchiveName};
use trip_recorder::infra::Config;
use trip_recorder::io::{ArchiveStore, HttpRemoteStore};
use trip_recorder::services::UploadReconciler;

#[derive(Parser, Debug)]
#[command(name = "trip-archives", version, about = "Inspect and upload recorded trips")]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List archives, newest trip first
    List {
        /// Only archives recorded for this owner
        #[arg(long)]
        owner: Option<String>,
    },
    /// Print one archive's records
    Show {
        /// Archive filename as printed by `list`
        name: String,
    },
    /// Run one reconciliation pass against the remote store
    Upload {
        /// Owner whose archives to upload (defaults to the configured identity)
        #[arg(long)]
        owner: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);
    let archives = ArchiveStore::new(config.storage_dir().join("archives"));

    match args.command {
        Command::List { owner } => list(&archives, owner.as_deref()),
        Command::Show { name } => show(&archives, &name),
        Command::Upload { owner } => {
            let owner = owner.or_else(|| config.owner_identity().map(str::to_string));
            upload(&config, archives, owner.as_deref()).await
        }
    }
}

fn list(archives: &ArchiveStore, owner: Option<&str>) -> anyhow::Result<()> {
    let names = archives.list(owner).context("listing archives")?;
    if names.is_empty() {
        eprintln!("no archives in {}", archives.dir().display());
        return Ok(());
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}

fn show(archives: &ArchiveStore, name: &str) -> anyhow::Result<()> {
    let Some(parsed) = ArchiveName::parse(name) else {
        bail!("not an archive filename: {name}");
    };

    println!("kind:  {}", parsed.kind.as_str());
    println!("owner: {}", parsed.owner);
    println!("start: {}", parsed.start.to_rfc3339());
    println!("end:   {}", parsed.end.to_rfc3339());

    match parsed.kind {
        ArchiveKind::Locations => {
            let samples = archives.load_locations(name).with_context(|| format!("reading {name}"))?;
            println!("fixes: {}", samples.len());
            for s in samples {
                println!(
                    "{}  {:>10.5} {:>11.5}  speed {:>6.2} m/s  heading {:>5.1}  accuracy {:>6.1} m",
                    s.timestamp.to_rfc3339(),
                    s.latitude,
                    s.longitude,
                    s.speed,
                    s.heading,
                    s.accuracy
                );
            }
        }
        ArchiveKind::Motions => {
            let samples = archives.load_motions(name).with_context(|| format!("reading {name}"))?;
            println!("readings: {}", samples.len());
            for s in samples {
                println!("{}  {}", s.started_at.to_rfc3339(), s.kind.as_str());
            }
        }
    }
    Ok(())
}

async fn upload(
    config: &Config,
    archives: ArchiveStore,
    owner: Option<&str>,
) -> anyhow::Result<()> {
    let Some(base_url) = config.remote_base_url() else {
        bail!("no remote base_url configured in {}", config.config_file());
    };
    if owner.is_none() {
        bail!("no owner: pass --owner or set [owner] identity");
    }

    let remote =
        HttpRemoteStore::new(base_url, Duration::from_millis(config.remote_timeout_ms()))?;
    let reconciler = UploadReconciler::new(archives, Arc::new(remote));
    let report = reconciler.reconcile(owner).await?;

    println!(
        "local {}  remote {}  uploaded {}  failed {}",
        report.local,
        report.remote,
        report.uploaded.len(),
        report.failed.len()
    );
    for name in &report.uploaded {
        println!("uploaded  {name}");
    }
    for failure in &report.failed {
        println!("FAILED    {}  ({})", failure.file_name, failure.error);
    }

    if !report.is_clean() {
        bail!("{} archive(s) not uploaded", report.failed.len());
    }
    Ok(())
}
