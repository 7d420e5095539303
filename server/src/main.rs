mod adapters;
mod config;
mod persistence;

use std::sync::Arc;

use anyhow::Context;
use game_analyzer::GameAnalyzer;
use live_session::LiveSessionHandle;
use persistence::sqlite::{Database, SqliteAnalysisRepository, SqliteGameRepository};
use worker_pool::WorkerPool;

use adapters::{AnalysisStoreAdapter, GameSourceAdapter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::prelude::*;

    let log_dir = config::log_dir();
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "chess-analysis-server");
    let (non_blocking, _log_guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_span_events(FmtSpan::CLOSE).with_filter(env_filter()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(env_filter()),
        )
        .init();

    tracing::info!("starting chess analysis dispatcher");

    let db_path = config::database_path();
    tracing::info!(path = %db_path.display(), "opening sqlite database");
    let database = Database::open(&db_path).await.context("failed to open/migrate sqlite database")?;

    let game_repo = Arc::new(SqliteGameRepository::new(database.pool().clone()));
    let analysis_repo = Arc::new(SqliteAnalysisRepository::new(database.pool().clone()));

    let pool_config = config::pool_config();
    tracing::info!(
        pool_size = pool_config.pool_size,
        reserved_for_live = pool_config.reserved_for_live,
        engine_path = %pool_config.engine_path.display(),
        "spawning worker pool"
    );
    let pool = WorkerPool::spawn(pool_config);

    // No HTTP/SSE transport ships here; an external caller embeds this wiring
    // (`_analyzer`, `live_session`, `pool`) behind its own transport. Here we
    // just keep the process alive, supervising the pool, until a shutdown
    // signal arrives.
    let _analyzer = Arc::new(GameAnalyzer::new(
        pool.clone(),
        Arc::new(GameSourceAdapter::new(game_repo)),
        Arc::new(AnalysisStoreAdapter::new(analysis_repo)),
    ));
    let live_session = LiveSessionHandle::spawn(pool.clone());

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, draining pool");

    live_session.shutdown().await;
    pool.shutdown().await;

    tracing::info!("shut down cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
        _ = sigint.recv() => tracing::info!("received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received ctrl-c");
}
