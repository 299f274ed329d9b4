//! Roulette Sync 서버 진입점

use anyhow::Context;
use roulette_sync_rs::{archive::ArchiveStore, config::Config, handlers, router, state::AppState};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    // 로깅 초기화
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let archive = ArchiveStore::open(&config.archive.db_path, config.archive.ttl_secs)
        .with_context(|| format!("failed to open archive at {}", config.archive.db_path))?;
    tracing::info!(path = %config.archive.db_path, "Room archive opened");

    let state = Arc::new(AppState::new(config.clone(), archive));

    // 재시작 전에 만료된 레코드 정리
    handlers::sweep_expired_archives(&state).await;

    // 아카이브 만료 스케줄러
    let sweep_state = state.clone();
    let sweep_every = config.archive.sweep_interval_secs.max(1);
    let sweeper = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(sweep_every));
        interval.tick().await;
        loop {
            interval.tick().await;
            handlers::sweep_expired_archives(&sweep_state).await;
        }
    });

    let app = router(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("🎡 Roulette Sync Server started");
    tracing::info!("Address: {}", addr);
    tracing::info!("WebSocket: ws://{}/ws", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await
        .context("server error")?;

    sweeper.abort();
    Ok(())
}

/// 종료 신호를 받으면 열린 WebSocket 연결도 함께 끊는다
async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    state.shutdown().await;
}
