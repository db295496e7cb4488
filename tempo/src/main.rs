use anyhow::{Context, Result};
use std::sync::Arc;
use tempo::config::load_config;
use tempo::engine::{TickOutcome, TimerEngine};
use tempo::ipc::server;
use tempo::notify::DesktopNotifier;
use tempo::persistence::JsonFileStore;
use tempo::scheduler::{IntervalScheduler, TICK_SIGNAL};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    let data_path = config.data_path()?;
    let store = JsonFileStore::open(&data_path)
        .with_context(|| format!("Failed to open state file at {:?}", data_path))?;
    info!("State file: {}", store.path().display());

    let (scheduler, mut signals) = IntervalScheduler::new();
    let engine = Arc::new(
        TimerEngine::new(
            Arc::new(store),
            Arc::new(scheduler),
            Arc::new(DesktopNotifier::new("tempo")),
        )
        .with_tick_period(config.tick_interval())
        .with_history_retries(config.history_write_retries),
    );

    engine
        .recover()
        .await
        .context("Failed to restore timer state")?;

    let ticker = engine.clone();
    tokio::spawn(async move {
        while let Some(signal) = signals.recv().await {
            if signal != TICK_SIGNAL {
                warn!(signal = %signal, "ignoring unknown scheduler signal");
                continue;
            }
            match ticker.tick().await {
                Ok(TickOutcome::Completed(completion)) => {
                    debug!(?completion, "tick completed a session")
                }
                Ok(_) => {}
                Err(e) => error!("Tick failed: {}", e),
            }
        }
    });

    tokio::select! {
        res = server::start(&config.socket_path, engine) => {
            res.context("IPC server stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    let _ = std::fs::remove_file(&config.socket_path);
    Ok(())
}
