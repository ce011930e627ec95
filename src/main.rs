use std::net::SocketAddr;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kube_mcp_gate::{
    build_router,
    bridge::stdio::serve_stdio,
    config::{Config, Transport},
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // stderr only: on stdio, stdout carries protocol frames.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded, transport={}", config.transport.as_str());

    let state = AppState::new(&config).await?;
    tracing::info!("AppState initialized with {} tools", state.server.catalog().await.len());

    let sweeper = state
        .sessions
        .spawn_sweeper(config.sweep_interval, state.shutdown.clone());
    tracing::info!("Session sweeper started (every {}s)", config.sweep_interval.as_secs());

    spawn_ctrl_c(state.shutdown.clone());

    match config.transport {
        Transport::Stdio => {
            tracing::info!("Serving MCP over stdio");
            serve_stdio(state.clone()).await?;
        }
        transport => {
            let app = build_router(state.clone());
            let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
            tracing::info!("Server listening on http://{} ({})", addr, transport.as_str());

            let listener = tokio::net::TcpListener::bind(&addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(state.shutdown.clone().cancelled_owned())
                .await?;
        }
    }

    state.shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!("Session sweeper failed: {}", e);
    }
    tracing::info!("Shut down with {} live session(s)", state.sessions.len().await);
    for session in state.sessions.snapshot().await {
        tracing::debug!(
            "Dropping session {} (user={}, role={}, expires_at={})",
            session.id,
            session.user_id,
            session.role,
            session.expires_at
        );
    }

    Ok(())
}

fn spawn_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                shutdown.cancel();
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
        }
    });
}
