use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

mod asr;
mod config;
mod emotion;
mod error;
mod gate;
mod gate_data;
mod models;
mod mt;
mod pipeline;
mod providers;
mod reaper;
mod registry;
mod text;
mod transport;
mod tts;

use crate::asr::AsrClient;
use crate::config::AppConfig;
use crate::mt::MtClient;
use crate::pipeline::PipelineDeps;
use crate::reaper::Reaper;
use crate::registry::SessionRegistry;
use crate::transport::AppState;
use crate::tts::TtsClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }

    tracing::info!("Starting voice relay server v{}", env!("CARGO_PKG_VERSION"));

    let registry = Arc::new(SessionRegistry::new());
    let asr = Arc::new(AsrClient::new(config.providers.asr.clone()));
    let mt = Arc::new(MtClient::new(config.providers.mt.clone()));
    let tts = Arc::new(TtsClient::new(config.providers.tts.clone(), &config.cache));

    let pipeline_deps = Arc::new(PipelineDeps {
        registry: registry.clone(),
        asr: asr.clone(),
        mt: mt.clone(),
        tts: tts.clone(),
        gate_config: config.gate.clone(),
    });

    // Background sweep: idle ASR/TTS state, idle sessions, expired
    // reconnect windows (spec §5).
    let reaper = Reaper::new(registry.clone(), asr.clone(), tts.clone(), config.reaper.clone());
    let reaper_handle = tokio::spawn(reaper.run());

    let state = AppState {
        registry,
        pipeline_deps,
        heartbeat: config.heartbeat.clone(),
    };

    // Build WebSocket + liveness router
    let app = transport::build_router(state);

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Relay server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper_handle.abort();
    tracing::info!("Voice relay server stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    tracing::info!("Shutdown signal received");
}
