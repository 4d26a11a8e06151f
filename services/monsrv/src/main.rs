//! monsrv - WardenHMS monitoring service
//!
//! Ingests sensor readings from the message bus, keeps the working set and
//! the SQLite history current, evaluates notification rules on every update
//! and runs the daily rollup job.

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use monsrv::bus::MessageBus;
use monsrv::config::Config;
use monsrv::engine::RuleEngine;
use monsrv::error::{MonsrvError, Result};
use monsrv::fanout::FanOut;
use monsrv::notify::{LogNotifier, Notifier};
use monsrv::pipeline::Pipeline;
use monsrv::{logging, rollup, LocalBus};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_model::{DecodePolicy, ValueKind};
use warden_rtdb::{CoalescerConfig, HistoryStore, SqliteHistory, WorkingSet, WriteCoalescer};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run in service mode
    Service,

    /// Check a condition expression against the known channel kinds
    Validate {
        /// Expression, e.g. "{zige/pozar0/temp/val} > 30"
        expression: String,
    },

    /// Aggregate one day of history into daily rollups
    Rollup {
        /// Day to aggregate (default: yesterday)
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    let _log_guard = logging::init(&config.service)?;

    match args.command {
        Some(Commands::Service) | None => {
            run_service(&config).await?;
        }
        Some(Commands::Validate { expression }) => {
            validate_expression(&config, &expression).await?;
        }
        Some(Commands::Rollup { date }) => {
            run_rollup(&config, date.as_deref()).await?;
        }
    }

    Ok(())
}

/// Run the monitoring service until a shutdown signal arrives.
async fn run_service(config: &Config) -> Result<()> {
    info!(name = %config.service.name, "starting monitoring service");

    let store = SqliteHistory::connect(&config.store.path, config.store.max_connections).await?;
    warden_rules::ensure_rules_schema(store.pool()).await?;

    let memory = Arc::new(WorkingSet::new(config.memory.window_size));
    let coalescer = Arc::new(WriteCoalescer::new(CoalescerConfig {
        debounce_ms: config.coalescer.debounce_ms,
        max_pending: config.coalescer.max_pending,
    }));
    let fanout = Arc::new(FanOut::new(config.fanout.client_queue_capacity));

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let engine = Arc::new(RuleEngine::new(
        memory.clone(),
        Arc::new(store.clone()),
        notifier,
        &config.engine,
    ));

    let (update_tx, update_rx) = mpsc::channel(config.ingest.queue_capacity);
    let pipeline = Arc::new(Pipeline::new(
        memory,
        coalescer.clone(),
        fanout,
        DecodePolicy::rejecting(&config.ingest.reject_sentinels),
        update_tx,
    ));

    let hydrated = pipeline.hydrate(&store).await?;
    let rules = warden_rules::load_all_rules(store.pool()).await?;
    info!(
        channels = hydrated,
        rules = rules.len(),
        "state loaded from store"
    );
    engine.install(rules).await;

    let bus = LocalBus::new();
    let events = bus.subscribe(&config.ingest.topic_pattern).await?;

    let cancel = CancellationToken::new();

    let flush_task = {
        let coalescer = coalescer.clone();
        let store = store.clone();
        let token = cancel.clone();
        tokio::spawn(async move { coalescer.flush_loop_with_shutdown(&store, token).await })
    };
    let engine_task = {
        let engine = engine.clone();
        let token = cancel.clone();
        tokio::spawn(async move { engine.run(update_rx, token).await })
    };
    let pipeline_task = {
        let pipeline = pipeline.clone();
        let token = cancel.clone();
        tokio::spawn(async move { pipeline.run(events, token).await })
    };
    let rollup_task = {
        let store = store.clone();
        let hour = config.rollup.hour_utc;
        let token = cancel.clone();
        tokio::spawn(async move { rollup::scheduler(&store, hour, token).await })
    };

    info!("monitoring service started");
    wait_for_shutdown().await;
    info!("shutdown signal received");
    cancel.cancel();

    // Drain in pipeline order so the coalescer sees the last enqueued
    // readings before its final flush.
    let drain = async {
        for task in [pipeline_task, engine_task, flush_task, rollup_task] {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(config.shutdown.hard_timeout(), drain)
        .await
        .is_err()
    {
        warn!("graceful shutdown timed out, exiting anyway");
    }

    info!("monitoring service stopped");
    Ok(())
}

/// Validate an expression against the channel kinds seen in the store.
async fn validate_expression(config: &Config, expression: &str) -> Result<()> {
    let store = SqliteHistory::connect(&config.store.path, config.store.max_connections).await?;
    let kinds: HashMap<String, ValueKind> = store
        .latest_per_channel()
        .await?
        .into_iter()
        .map(|r| {
            let kind = r.kind();
            (r.channel, kind)
        })
        .collect();

    match warden_rules::check(expression, &kinds) {
        Ok(()) => {
            println!("ok ({} known channels)", kinds.len());
            Ok(())
        }
        Err(e) => {
            println!("invalid: {e}");
            std::process::exit(1);
        }
    }
}

/// Run the daily rollup for a single day.
async fn run_rollup(config: &Config, date: Option<&str>) -> Result<()> {
    let day = match date {
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map_err(|e| MonsrvError::ConfigError(format!("invalid --date '{text}': {e}")))?,
        None => Utc::now()
            .date_naive()
            .pred_opt()
            .ok_or_else(|| MonsrvError::InternalError("no previous day".to_string()))?,
    };

    let store = SqliteHistory::connect(&config.store.path, config.store.max_connections).await?;
    let written = rollup::run_for_day(&store, day).await?;
    println!("rollup for {day}: {written} channels written");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM on Unix).
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}, only Ctrl+C will stop the service");
                None
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                match term {
                    Some(mut sig) => {
                        sig.recv().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
