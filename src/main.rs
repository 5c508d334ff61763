//! Parley - multi-platform AI chat relay
//!
//! Listens on Telegram, Discord and Slack, forwards each user's message with
//! their recent history to a single AI provider, and posts the reply back.
//! A small HTTP surface reports health and deployment status.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod channels;
mod config;
mod conversation;
mod core;
mod providers;
mod routes;

use config::Config;
use core::{ChatEngine, ConversationStore};
use providers::ProviderChoice;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub provider: ProviderChoice,
}

fn fatal(message: impl Display) -> ! {
    tracing::error!("❌ {}", message);
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().unwrap_or_else(|e| fatal(e));
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let (choice, provider) = providers::activate(&config).unwrap_or_else(|e| fatal(e));
    let system_prompt = config::prompts::resolve_system_prompt(&config)
        .await
        .unwrap_or_else(|e| fatal(e));

    let memory = Arc::new(ConversationStore::new());
    let engine = Arc::new(ChatEngine::new(provider, memory.clone(), system_prompt));
    tracing::info!("🧠 AI provider: {} ({})", choice, engine.provider_name());

    let channels = channels::from_config(&config);
    if channels.is_empty() {
        tracing::warn!("No chat platform configured; serving HTTP endpoints only");
    }
    tokio::spawn(channels::run(channels, engine));

    let state = AppState {
        config: Arc::new(config),
        provider: choice,
    };

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("🔥 Parley running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(
        "👋 Shutting down with {} conversation(s) in memory",
        memory.len().await
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
