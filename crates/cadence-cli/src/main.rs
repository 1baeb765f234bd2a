mod cli;
mod retry;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use tracing::info;

use cadence_core::app::{ControlClient, JobRunOutcome, MetricsSnapshot};
use cadence_core::ports::FailureStore;
use cadence_core::telemetry::init_tracing;
use cadence_core::{AppBuilder, Runtime, RuntimeConfig};

use cli::{Cli, Commands, CronAction, FailedAction, TaskAction};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => RuntimeConfig::default(),
    };
    if let Some(address) = &cli.address {
        config.control.address = address.clone();
    }

    init_tracing(&config.logging).context("initializing logging")?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Stop => stop(&config).await,
        Commands::Status { watch } => status(&config, watch).await,
        Commands::Task { action } => match action {
            TaskAction::List => task_list(config),
            TaskAction::Failed { action } => match action {
                FailedAction::View { limit, offset } => failed_view(config, limit, offset).await,
                FailedAction::Clear => failed_clear(config).await,
                FailedAction::Retry { batch_size } => failed_retry(config, batch_size).await,
            },
        },
        Commands::Cron { action } => match action {
            CronAction::List => cron_list(config),
            CronAction::Run { identifier } => cron_run(config, &identifier).await,
        },
    }
}

fn build(config: RuntimeConfig) -> Result<Arc<Runtime>> {
    let builder = tasks::register(AppBuilder::new(config))?;
    Ok(builder.build()?)
}

/// One-shot commands run tasks inline and never start the server parts.
fn build_offline(mut config: RuntimeConfig) -> Result<Arc<Runtime>> {
    config.worker.sync_mode = true;
    build(config)
}

async fn serve(config: RuntimeConfig) -> Result<()> {
    let runtime = build(config)?;
    let handle = runtime.start().await.context("starting runtime")?;

    let shutdown = runtime.shutdown_signal();
    tokio::select! {
        _ = shutdown.wait() => {}
        ctrl_c = tokio::signal::ctrl_c() => {
            ctrl_c.context("listening for ctrl-c")?;
            info!("ctrl-c received");
        }
    }
    handle.shutdown_and_join().await;
    Ok(())
}

async fn connect(config: &RuntimeConfig) -> Result<ControlClient> {
    ControlClient::connect(&config.control.address)
        .await
        .context("is the server running?")
}

async fn stop(config: &RuntimeConfig) -> Result<()> {
    let mut client = connect(config).await?;
    if client.shutdown().await? {
        println!("shutdown requested");
        Ok(())
    } else {
        bail!("server refused shutdown")
    }
}

async fn status(config: &RuntimeConfig, watch: Option<u64>) -> Result<()> {
    let mut client = connect(config).await?;
    loop {
        let document = client.metrics().await?;
        print_status(&document)?;

        let Some(secs) = watch else {
            return Ok(());
        };
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs.max(1))) => println!(),
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn print_status(document: &serde_json::Value) -> Result<()> {
    let server = &document["server"];
    let metrics: MetricsSnapshot =
        serde_json::from_value(document["metrics"].clone()).context("decoding metrics")?;

    println!(
        "{} ({}) up {}s since {}",
        server["name"].as_str().unwrap_or("?"),
        server["environment"].as_str().unwrap_or("?"),
        metrics.uptime_secs,
        metrics.started_at.to_rfc3339()
    );
    println!(
        "tasks   dispatched={} succeeded={} failed={} not_found={} in_flight={} resubmitted={} dropped={}",
        metrics.tasks_dispatched,
        metrics.tasks_succeeded,
        metrics.tasks_failed,
        metrics.tasks_not_found,
        metrics.tasks_in_flight,
        metrics.tasks_resubmitted,
        metrics.failure_records_dropped
    );
    println!(
        "cron    ticks={} launched={} succeeded={} failed={} lock_skipped={}",
        metrics.cron_ticks, metrics.cron_launched, metrics.cron_succeeded, metrics.cron_failed, metrics.cron_lock_skipped
    );
    println!("control requests={}", metrics.control_requests);
    Ok(())
}

fn task_list(config: RuntimeConfig) -> Result<()> {
    let runtime = build_offline(config)?;
    for identifier in runtime.registry().identifiers() {
        println!("{identifier}");
    }
    Ok(())
}

fn warn_if_in_memory(config: &RuntimeConfig) {
    if config.storage.database_path.is_none() {
        eprintln!("note: storage.database_path is not set; the failure store is in-memory and empty here");
    }
}

async fn failed_view(config: RuntimeConfig, limit: usize, offset: usize) -> Result<()> {
    warn_if_in_memory(&config);
    let runtime = build_offline(config)?;
    let store = runtime.store();

    let total = store.count().await?;
    let records = store.list_page(offset, limit).await?;
    println!("{total} failed task(s)");
    for record in records {
        println!(
            "{}  {}  attempt={}  {}  {}",
            record.id,
            record.created_at.to_rfc3339(),
            record.attempt,
            record.identifier,
            record.failure_reason
        );
    }
    Ok(())
}

async fn failed_clear(config: RuntimeConfig) -> Result<()> {
    warn_if_in_memory(&config);
    let runtime = build_offline(config)?;
    let removed = runtime.store().clear().await?;
    println!("removed {removed} failed task(s)");
    Ok(())
}

async fn failed_retry(config: RuntimeConfig, batch_size: usize) -> Result<()> {
    warn_if_in_memory(&config);
    let mut client = connect(&config).await?;
    let runtime = build_offline(config)?;

    let tally = retry::resubmit_failed(runtime.store().as_ref(), &mut client, batch_size).await?;
    println!("resubmitted {}, rejected {}", tally.accepted, tally.rejected);
    Ok(())
}

fn cron_list(config: RuntimeConfig) -> Result<()> {
    let runtime = build_offline(config)?;
    for job in runtime.scheduler().describe_all(Utc::now()) {
        let next = job
            .computed
            .and_then(|c| c.next_run_at)
            .map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
        println!(
            "{:<24} {:<16} {:<8} due={:<5} next={}",
            job.identifier,
            job.schedule,
            if job.enabled { "enabled" } else { "disabled" },
            job.is_due(),
            next
        );
    }
    Ok(())
}

async fn cron_run(config: RuntimeConfig, identifier: &str) -> Result<()> {
    let runtime = build_offline(config)?;
    match runtime.scheduler().run_now(identifier).await? {
        JobRunOutcome::Succeeded => {
            println!("{identifier}: ok");
            Ok(())
        }
        JobRunOutcome::Failed(reason) => bail!("{identifier} failed: {reason}"),
        JobRunOutcome::Panicked(reason) => bail!("{identifier} panicked: {reason}"),
    }
}
