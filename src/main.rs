//! Snapsync CLI - keeps the relational server and the distributed SQLite snapshot in sync

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use snapsync::catalog::CatalogSet;
use snapsync::config::{self, SyncConfig};
use snapsync::relational::PgConnector;
use snapsync::scheduler::Scheduler;
use snapsync::server;
use snapsync::service::{ImportOptions, SyncService};
use snapsync::startup::{HttpProbe, Startup};
use snapsync::ui::{self, Icons, Spinner};
use snapsync::ExportOutcome;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "snapsync")]
#[command(version)]
#[command(about = "Sync a PostgreSQL server with distributable SQLite snapshots")]
#[command(long_about = r#"
Snapsync keeps a relational server database and a distributed SQLite snapshot
eventually consistent:
  • imports the bundled SQLite data into PostgreSQL on first boot
  • exports PostgreSQL back into a fresh snapshot on a schedule
  • serves the latest snapshot over HTTP with resumable downloads

Example usage:
  snapsync init-config
  snapsync serve
  snapsync import --dry-run
  snapsync status
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file (defaults to ./snapsync.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for upstream, import, export, then serve snapshots and export on a schedule
    Serve,

    /// Import the SQLite source files into the relational store
    Import {
        /// Convert and count rows without writing
        #[arg(long)]
        dry_run: bool,

        /// Import even if every relational table already holds data
        #[arg(short, long)]
        force: bool,
    },

    /// Build a fresh snapshot from the relational store and rotate the old one
    Export,

    /// Show snapshot files and relational row counts
    Status,

    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::InitConfig { force } => {
            let path = cli.config.unwrap_or_else(config::default_config_path);
            config::write_config(&path, &SyncConfig::default(), force)?;
            ui::success(&format!("Wrote {}", path.display()));
            Ok(())
        }
        command => {
            let config = config::load_config(cli.config.as_deref())?;
            config::ensure_dirs(&config)?;
            let service = build_service(&config)?;
            match command {
                Commands::Serve => serve(config, service).await,
                Commands::Import { dry_run, force } => import(&service, dry_run, force).await,
                Commands::Export => export(&service).await,
                Commands::Status => status(&service).await,
                Commands::InitConfig { .. } => Ok(()),
            }
        }
    }
}

fn build_service(config: &SyncConfig) -> anyhow::Result<Arc<SyncService<PgConnector>>> {
    let catalogs = CatalogSet::builtin();
    catalogs.validate().context("built-in catalogs are invalid")?;

    let service = SyncService::new(
        config.connector(),
        Arc::new(catalogs),
        config.snapshot_paths(),
        config.source_files(),
    )
    .with_batch_size(config.storage.batch_size);
    Ok(Arc::new(service))
}

async fn serve(config: SyncConfig, service: Arc<SyncService<PgConnector>>) -> anyhow::Result<()> {
    let addr = config.listen_addr()?;
    let state = Arc::new(config.app_state());
    let mut server = tokio::spawn(server::start_server(addr, state));

    let probe = HttpProbe::new(
        config.startup.probe_urls.clone(),
        config.startup.health_path.clone(),
        config.probe_timeout(),
    )?;
    let mut startup = Startup::new(service.as_ref(), &probe).poll_interval(config.poll_interval());

    // Downloads answer 404 until the first export lands.
    tokio::select! {
        result = startup.run() => result.context("startup sequence failed")?,
        joined = &mut server => return joined.context("server task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted during startup");
            return Ok(());
        }
    }
    tracing::info!("Startup complete, snapshot is being served");

    let scheduler = Scheduler::spawn(Arc::clone(&service), config.export_interval());

    let result = tokio::select! {
        joined = &mut server => joined.context("server task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    };
    scheduler.shutdown().await;
    result
}

async fn import(service: &SyncService<PgConnector>, dry_run: bool, force: bool) -> anyhow::Result<()> {
    ui::header(if dry_run { "Import (dry run)" } else { "Import" });
    for source in service.sources() {
        ui::status(Icons::FILE, &source.catalog, &source.path.display().to_string());
    }

    let spinner = Spinner::new("Importing source files...");
    let report = match service.run_import_if_needed(ImportOptions { force, dry_run }).await {
        Ok(report) => report,
        Err(e) => {
            spinner.fail("Import failed");
            return Err(e.into());
        }
    };

    let Some(report) = report else {
        spinner.finish("Relational store already populated, nothing to do (use --force)");
        return Ok(());
    };
    spinner.finish(if dry_run { "Dry run complete" } else { "Import complete" });

    ui::section("Rows");
    for table in &report.tables {
        ui::summary_row(&format!("{}.{}", table.catalog, table.table), &table.rows.to_string());
    }
    let label = if dry_run { "Would import" } else { "Imported" };
    ui::info(label, &format!("{} rows", report.rows_imported));
    Ok(())
}

async fn export(service: &SyncService<PgConnector>) -> anyhow::Result<()> {
    ui::header("Export");
    let spinner = Spinner::new("Building snapshot...");
    match service.run_export().await {
        Ok(ExportOutcome::Completed(report)) => {
            spinner.finish("Snapshot installed");
            ui::section("Rows");
            for table in &report.tables {
                ui::summary_row(&table.table, &table.rows.to_string());
            }
            ui::info("Snapshot", &report.path.display().to_string());
            ui::info("Size", &ui::human_bytes(report.size));
            Ok(())
        }
        Ok(ExportOutcome::Skipped) => {
            spinner.fail("Another export is already running");
            Ok(())
        }
        Err(e) => {
            spinner.fail("Export failed");
            Err(e.into())
        }
    }
}

async fn status(service: &SyncService<PgConnector>) -> anyhow::Result<()> {
    ui::header("Snapsync status");

    ui::section("Snapshot");
    let paths = service.paths();
    let facts = vec![
        ("Current", describe_file(&paths.current)),
        ("Backup", describe_file(&paths.backup)),
        ("Pending temp", describe_file(&paths.temp)),
    ];
    println!("{}", ui::snapshot_table(&facts));

    ui::section("Relational store");
    match service.table_status().await {
        Ok(tables) => println!("{}", ui::tables_table(&tables)),
        Err(e) => ui::warn(&format!("Relational store unavailable: {}", e)),
    }
    Ok(())
}

fn describe_file(path: &Path) -> String {
    let Ok(meta) = std::fs::metadata(path) else {
        return ui::muted("absent");
    };
    let age = meta
        .modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .map(ui::human_age)
        .unwrap_or_else(|| "unknown age".to_string());
    format!("{} ({}, {})", path.display(), ui::human_bytes(meta.len()), age)
}
