// src/main.rs
// Process entry point: load config, open the Store, recover crashed
// sessions, wire the singletons into `AppState`, and serve. Follows the
// teacher's `src/bin/mira.rs` shape (parse args, build the long-lived
// service, run it) generalized from a REPL loop to an axum server.

use agent_relay::agent::SessionManager;
use agent_relay::config::Config;
use agent_relay::history::HistoryBuffer;
use agent_relay::hub::Hub;
use agent_relay::model::SessionConfig;
use agent_relay::router;
use agent_relay::state::AppState;
use agent_relay::store::Store;
use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::prelude::*;

/// Overrides layered on top of the environment-driven `Config` (spec's
/// ambient config section allows either source; CLI flags win when
/// given, matching `clap`'s usual `env` fallback idiom).
#[derive(Parser, Debug)]
#[command(name = "agent-relay")]
#[command(author, version)]
#[command(about = "Remote control server for long-running interactive coding-agent CLIs")]
struct Cli {
    /// Address to bind the HTTP/WebSocket server to.
    #[arg(long, env = "AGENT_RELAY_HOST")]
    host: Option<String>,

    /// Port to bind the HTTP/WebSocket server to.
    #[arg(long, env = "AGENT_RELAY_PORT")]
    port: Option<u16>,

    /// SQLite database path.
    #[arg(long, env = "AGENT_RELAY_DB_PATH")]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(db_path) = cli.db_path {
        config.database.path = db_path;
    }

    let filter = tracing_subscriber::EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    let store = Arc::new(Store::open(&config.database.path).await?);
    let token = store.get_or_create_token().await?;
    tracing::info!(db_path = %config.database.path, "store opened");

    let session_config = store
        .get_session_config(&SessionConfig::from_defaults(&config.session_defaults))
        .await?;

    let history = Arc::new(HistoryBuffer::new(session_config.history_buffer_capacity as usize));
    let tools = Arc::new(config.tools.clone());

    let (event_tx, event_rx) = tokio::sync::mpsc::channel(1024);
    let manager = SessionManager::new(store.clone(), history.clone(), tools.clone(), session_config.clone(), event_tx);

    // Crash recovery: no live PTY survives a restart, so every
    // previously-`active` conversation is marked `suspended` before the
    // server starts accepting connections (spec §4.1, §8 scenario 6).
    manager.bootstrap().await?;

    let hub = Hub::new(manager.clone(), history.clone(), store.clone(), session_config.outbound_queue_capacity as usize, event_rx);

    let state = AppState {
        store,
        history,
        manager,
        hub,
        tools,
        token: Arc::from(token.as_str()),
        config: Arc::new(config.clone()),
    };

    let app = router::build(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive());

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "agent-relay listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(state.manager.clone())).await?;

    Ok(())
}

/// Graceful shutdown (spec §10): stop accepting new connections (the
/// `with_graceful_shutdown` future completing does that), suspend every
/// live session so no child process outlives the server, then return —
/// the Store is fsync'd per-write via SQLite's WAL mode, so there is
/// nothing further to flush here.
async fn shutdown_signal(manager: Arc<SessionManager>) {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received, suspending live sessions");
    manager.suspend_all().await;
    tracing::info!("shutdown complete");
}
