//! Echobeats - persistent cognitive beat scheduler
//!
//! Main entry point for the echobeats host process.

mod cli;
mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use echobeats_beats::EchobeatsScheduler;
use echobeats_scheduler::{FileJobStore, JobEventKind, JobStore};

use crate::cli::{Cli, Commands};
use crate::config::{AppConfig, ConfigLoader, LoggingConfig};

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let file_layer = match &logging.log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;

            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("echobeats")
                .filename_suffix("log")
                .max_log_files(30)
                .build(log_dir)?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Flushes buffered lines on exit.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            Some(fmt::layer().with_writer(non_blocking).with_ansi(false))
        }
        None => None,
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(file_layer)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut config, found) = ConfigLoader::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;

    init_tracing(&config.logging)?;
    if !found {
        debug!("Config file {} not found, using defaults", cli.config.display());
    }

    match cli.command {
        Commands::Run { store } => {
            apply_store_override(&mut config, store);
            run_scheduler(config).await
        }
        Commands::Jobs { store } => {
            apply_store_override(&mut config, store);
            list_jobs(&config).await
        }
    }
}

fn apply_store_override(config: &mut AppConfig, store: Option<PathBuf>) {
    if let Some(store) = store {
        let expanded = ConfigLoader::expand_path(&store.to_string_lossy());
        config.scheduler.store_path = PathBuf::from(expanded);
    }
}

/// Run the scheduler in the foreground until Ctrl-C.
async fn run_scheduler(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting echobeats v{}", env!("CARGO_PKG_VERSION"));
    info!("Job store: {}", config.scheduler.store_path.display());

    let beats = EchobeatsScheduler::open(config.scheduler.clone())
        .await
        .context("Failed to open job store")?;

    beats.add_listener_fn(|event| match event.kind {
        JobEventKind::Failed => warn!(
            "Job {} ({}) failed: {}",
            event.job.name,
            event.job.id,
            event.error.as_deref().unwrap_or("unknown error")
        ),
        kind => debug!("Job {} ({}) {}", event.job.name, event.job.id, kind),
    });

    let report = beats.start().await.context("Failed to start scheduler")?;
    info!(
        "Recovery: {} loaded, {} recovered, {} terminal skipped, {} unpersisted",
        report.loaded, report.recovered, report.skipped_terminal, report.unpersisted
    );

    let scheduled = beats.schedule_configured_beats(&config.beats).await?;
    for id in &scheduled {
        debug!("Scheduled beat {}", id);
    }

    info!("Echobeats running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    beats.stop()?;
    Ok(())
}

/// Print every persisted job straight from the store.
async fn list_jobs(config: &AppConfig) -> anyhow::Result<()> {
    let store = FileJobStore::new(&config.scheduler.store_path)
        .await
        .context("Failed to open job store")?;

    let mut jobs = store.load_all().await?;
    if jobs.is_empty() {
        println!("No jobs in {}", config.scheduler.store_path.display());
        return Ok(());
    }
    jobs.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at));

    println!(
        "{:<44} {:<24} {:<9} {:<10} {:<26} {:>5} {:>6}",
        "ID", "NAME", "TYPE", "STATUS", "NEXT RUN", "RUNS", "ERRORS"
    );
    for job in &jobs {
        println!(
            "{:<44} {:<24} {:<9} {:<10} {:<26} {:>5} {:>6}",
            job.id,
            job.name,
            job.job_type.to_string(),
            job.status.to_string(),
            job.next_run_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            job.run_count,
            job.error_count
        );
        if let Some(error) = &job.last_error {
            println!("    last error: {}", error);
        }
    }
    println!("\n{} jobs", jobs.len());

    Ok(())
}
