//! Tandem server entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use tandem::adapters::sqlite::{open_state_database, SqliteStateStore};
use tandem::application::WorkerManager;
use tandem::cli::{Cli, Commands};
use tandem::domain::models::Config;
use tandem::infrastructure::config::ConfigLoader;
use tandem::infrastructure::logging::Logger;
use tandem::rpc::{RpcDeps, RpcServer};
use tandem::services::{
    ChangeSignal, Coordinator, Notifier, PruneSettings, SessionRegistry, TaskScheduler, Watchdog,
    WorktreeManager,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load().context("Failed to load configuration")?,
    };

    // The status subcommand reads the store and exits without starting
    // any component.
    if let Some(Commands::Status { agent }) = cli.command {
        return status_command(&config, &agent).await;
    }

    let _logger = Logger::init(&config.logging).context("Failed to initialize logging")?;
    run_server(config).await
}

async fn status_command(config: &Config, agent: &str) -> Result<()> {
    let (coordinator, _signal_path) = open_coordinator(config).await?;
    let counts = coordinator
        .counts_for(agent)
        .await
        .context("Failed to read state")?;
    println!("unread={} pending={}", counts.unread_messages, counts.pending_tasks);
    Ok(())
}

async fn open_coordinator(config: &Config) -> Result<(Arc<Coordinator>, PathBuf)> {
    let db_path = ConfigLoader::database_path(config);
    let pool = open_state_database(&db_path, config.database.max_connections)
        .await
        .context("Failed to open state store")?;
    let store = Arc::new(SqliteStateStore::new(pool));

    let signal_path = db_path.with_extension("signal");
    let coordinator = Arc::new(Coordinator::new(
        store,
        ChangeSignal::new(&signal_path),
        PruneSettings {
            retention_hours: config.database.message_retention_hours,
            max_count: config.database.message_max_count,
        },
        PathBuf::from(&config.workspace),
    ));
    Ok((coordinator, signal_path))
}

async fn run_server(config: Config) -> Result<()> {
    let (coordinator, signal_path) = open_coordinator(&config).await?;

    let registry = Arc::new(SessionRegistry::new());
    let worktrees = Arc::new(WorktreeManager::new(config.worktrees.clone()));
    let scheduler = Arc::new(TaskScheduler::new(
        config.scheduler.strategy,
        config.workers.clone(),
        std::time::Duration::from_secs(config.scheduler.tick_interval_sec),
    ));

    let state_dir = signal_path
        .parent()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let manager = Arc::new(WorkerManager::new(
        coordinator.clone(),
        registry.clone(),
        worktrees,
        config.workers.clone(),
        state_dir.join("worker-logs"),
    ));

    let (recovery_tx, recovery_rx) = mpsc::channel(32);
    let watchdog = Arc::new(Watchdog::new(config.watchdog.clone(), recovery_tx));
    let notifier = Arc::new(Notifier::new(
        config.notifier.clone(),
        config.auto_respond.clone(),
        state_dir.clone(),
    ));

    // Bind before spawning anything so startup failures exit non-zero
    // without leaving components behind.
    let listener = TcpListener::bind((config.server.bind.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "Failed to bind {}:{}",
                config.server.bind, config.server.port
            )
        })?;
    let rpc_url = format!("tcp://{}", listener.local_addr()?);
    manager.set_rpc_url(rpc_url.clone());
    tracing::info!(rpc_url = %rpc_url, "Tandem starting");

    let (shutdown_tx, _) = broadcast::channel(1);

    let mut handles = Vec::new();
    handles.push(tokio::spawn(scheduler.clone().run_loop(
        coordinator.clone(),
        shutdown_tx.subscribe(),
    )));
    handles.push(tokio::spawn(watchdog.run_loop(
        coordinator.clone(),
        scheduler.clone(),
        shutdown_tx.subscribe(),
    )));
    handles.push(tokio::spawn(notifier.run_loop(
        coordinator.clone(),
        registry.clone(),
        shutdown_tx.subscribe(),
    )));
    handles.push(tokio::spawn(
        manager
            .clone()
            .run_loop(recovery_rx, shutdown_tx.subscribe()),
    ));

    let server = RpcServer::new(RpcDeps {
        coordinator: coordinator.clone(),
        registry,
        scheduler,
        manager,
    });

    tokio::select! {
        served = server.serve(listener, shutdown_tx.clone()) => {
            served?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    let _ = shutdown_tx.send(());
    for handle in handles {
        let _ = handle.await;
    }
    tracing::info!("Tandem stopped");
    Ok(())
}
