//! Operational CLI for the depot bitstream storage engine.
//!
//! Exit codes: 0 for a completed run, 1 when any item failed
//! irrecoverably (so automation can detect partial failures), 2 for a
//! fatal setup error (bad config, unreachable store, job already
//! running).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use depot_core::EngineConfig;
use depot_engine::{
    BitstreamService, CleanupOptions, CleanupSweep, MigrationOptions, MigrationWorker,
    OrphanSweepOptions,
};
use depot_metadata::{SqliteStore, bitstreams};
use depot_storage::AssetStoreRegistry;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "depotctl")]
#[command(about = "Operational tooling for the depot bitstream storage engine")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "DEPOT_CONFIG",
        default_value = "config/depot.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reclaim bitstreams soft-deleted longer ago than the retention window
    Cleanup {
        /// Delete the metadata rows too, instead of keeping tombstones
        #[arg(long)]
        delete_db_records: bool,

        /// Log each reclaimed bitstream
        #[arg(long)]
        verbose: bool,
    },
    /// Move bitstreams from one asset store to another
    Migrate {
        /// Source store id
        #[arg(long)]
        source: u32,

        /// Destination store id
        #[arg(long)]
        destination: u32,

        /// Soft-delete the source copies so a later cleanup reclaims them
        #[arg(long)]
        delete_old: bool,

        /// Records per batch transaction (default from config)
        #[arg(long)]
        batch_size: Option<u32>,

        /// Report what would move without copying anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Print per-store record counts
    Stores,
    /// Remove files in a store that no metadata row references
    Sweep {
        /// Store id to sweep
        #[arg(long)]
        store: u32,

        /// Report orphans without removing them
        #[arg(long)]
        dry_run: bool,

        /// Override the configured grace window, in hours
        #[arg(long)]
        grace_hours: Option<u64>,
    },
    /// Recompute checksums for stored bitstreams and report mismatches
    Verify {
        /// Restrict verification to one store id
        #[arg(long)]
        store: Option<u32>,
    },
}

struct App {
    config: EngineConfig,
    db: Arc<SqliteStore>,
    registry: Arc<AssetStoreRegistry>,
    service: BitstreamService,
}

async fn setup(config_path: &str) -> Result<App> {
    let config: EngineConfig = Figment::new()
        .merge(Toml::file(config_path))
        .merge(Env::prefixed("DEPOT_"))
        .extract()
        .with_context(|| format!("failed to load config from {config_path}"))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let db = Arc::new(
        SqliteStore::new(&config.metadata_path)
            .await
            .context("failed to open metadata store")?,
    );
    db.health_check().await.context("metadata store unreachable")?;

    let registry = Arc::new(
        AssetStoreRegistry::from_config(&config.stores, config.incoming)
            .await
            .context("failed to open asset stores")?,
    );
    registry
        .health_check_all()
        .await
        .context("asset store unreachable")?;

    let service = BitstreamService::new(registry.clone(), config.checksum_algorithm);
    Ok(App {
        config,
        db,
        registry,
        service,
    })
}

/// Cancel the token on ctrl-c so jobs stop cooperatively between items.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing current item");
            handle.cancel();
        }
    });
    cancel
}

async fn run_cleanup(app: &App, delete_db_records: bool, verbose: bool) -> Result<ExitCode> {
    let sweep = CleanupSweep::new(app.db.clone(), app.registry.clone());
    let opts = CleanupOptions {
        delete_db_rows: delete_db_records,
        verbose,
        retention: app.config.retention(),
        batch_size: app.config.cleanup_batch_size,
        lease_ttl: app.config.lease_ttl(),
    };
    let cancel = cancel_on_ctrl_c();
    let summary = sweep.run(&opts, &cancel).await?;

    println!(
        "cleanup complete: reclaimed={} rows_removed={} tombstoned={} failed={} bytes_reclaimed={}{}",
        summary.reclaimed,
        summary.rows_removed,
        summary.tombstoned,
        summary.failed.len(),
        summary.bytes_reclaimed,
        if summary.cancelled { " (interrupted)" } else { "" },
    );
    for (store_id, internal_id) in &summary.failed {
        eprintln!("failed: store {store_id} bitstream {internal_id}");
    }
    Ok(if summary.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn run_migrate(
    app: &App,
    source: u32,
    destination: u32,
    delete_old: bool,
    batch_size: Option<u32>,
    dry_run: bool,
) -> Result<ExitCode> {
    let worker = MigrationWorker::new(app.db.clone(), app.registry.clone());
    let opts = MigrationOptions {
        source,
        dest: destination,
        delete_old,
        batch_size: batch_size.unwrap_or(app.config.migration_batch_size),
        dry_run,
        lease_ttl: app.config.lease_ttl(),
    };
    let cancel = cancel_on_ctrl_c();
    let summary = worker.run(&opts, &cancel).await?;

    println!(
        "migration {}: succeeded={} failed={} skipped={}{}",
        if dry_run { "dry run" } else { "complete" },
        summary.succeeded,
        summary.failed.len(),
        summary.skipped,
        if summary.cancelled { " (interrupted)" } else { "" },
    );
    for internal_id in &summary.failed {
        eprintln!("failed: bitstream {internal_id}");
    }
    Ok(if summary.failed.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn run_stores(app: &App) -> Result<ExitCode> {
    let mut conn = app.db.conn().await?;
    let reports = app.service.store_counts(&mut conn).await?;
    println!("{:>8}  {:>10}  {:>12}  {:>9}  backend", "store", "active", "soft-deleted", "incoming");
    for report in reports {
        println!(
            "{:>8}  {:>10}  {:>12}  {:>9}  {}{}",
            report.store_id,
            report.active,
            report.soft_deleted,
            if report.store_id == app.registry.incoming_id() {
                "yes"
            } else {
                ""
            },
            report.backend,
            if report.read_only { " (read-only)" } else { "" },
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_sweep(
    app: &App,
    store: u32,
    dry_run: bool,
    grace_hours: Option<u64>,
) -> Result<ExitCode> {
    let sweep = CleanupSweep::new(app.db.clone(), app.registry.clone());
    let opts = OrphanSweepOptions {
        store_id: store,
        grace: grace_hours
            .map(|h| time::Duration::hours(h as i64))
            .unwrap_or_else(|| app.config.orphan_grace()),
        dry_run,
        lease_ttl: app.config.lease_ttl(),
    };
    let cancel = cancel_on_ctrl_c();
    let summary = sweep.run_orphan_sweep(&opts, &cancel).await?;

    println!(
        "orphan sweep {}: scanned={} orphans={} removed={} skipped={} failed={}{}",
        if dry_run { "dry run" } else { "complete" },
        summary.scanned,
        summary.orphans,
        summary.removed,
        summary.skipped,
        summary.failed,
        if summary.cancelled { " (interrupted)" } else { "" },
    );
    Ok(if summary.failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

async fn run_verify(app: &App, store: Option<u32>) -> Result<ExitCode> {
    let store_ids: Vec<u32> = match store {
        Some(id) => vec![id],
        None => app.registry.ids().collect(),
    };

    let mut checked = 0u64;
    let mut mismatched = 0u64;
    let mut unreadable = 0u64;

    for store_id in store_ids {
        app.registry.resolve(store_id)?;
        let mut cursor: Option<String> = None;
        loop {
            let batch = {
                let mut conn = app.db.conn().await?;
                bitstreams::active_in_store(
                    &mut conn,
                    store_id,
                    cursor.as_deref(),
                    app.config.cleanup_batch_size,
                )
                .await?
            };
            if batch.is_empty() {
                break;
            }
            cursor = Some(batch[batch.len() - 1].internal_id.clone());

            for row in batch {
                checked += 1;
                let record = match row.into_record() {
                    Ok(record) => record,
                    Err(e) => {
                        tracing::error!(error = %e, "unreadable metadata row");
                        unreadable += 1;
                        continue;
                    }
                };
                match app.service.compute_checksum(&record).await {
                    Ok(digest) if digest == record.checksum => {}
                    Ok(digest) => {
                        tracing::error!(
                            store_id,
                            internal_id = %record.internal_id,
                            expected = %record.checksum,
                            actual = %digest,
                            "checksum mismatch"
                        );
                        mismatched += 1;
                    }
                    Err(e) => {
                        tracing::error!(
                            store_id,
                            internal_id = %record.internal_id,
                            error = %e,
                            "failed to read bitstream"
                        );
                        unreadable += 1;
                    }
                }
            }
        }
    }

    println!("verify complete: checked={checked} mismatched={mismatched} unreadable={unreadable}");
    Ok(if mismatched == 0 && unreadable == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let app = match setup(&cli.config).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("setup error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let result = match cli.command {
        Commands::Cleanup {
            delete_db_records,
            verbose,
        } => run_cleanup(&app, delete_db_records, verbose).await,
        Commands::Migrate {
            source,
            destination,
            delete_old,
            batch_size,
            dry_run,
        } => run_migrate(&app, source, destination, delete_old, batch_size, dry_run).await,
        Commands::Stores => run_stores(&app).await,
        Commands::Sweep {
            store,
            dry_run,
            grace_hours,
        } => run_sweep(&app, store, dry_run, grace_hours).await,
        Commands::Verify { store } => run_verify(&app, store).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
