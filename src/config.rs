use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

/// Top-level application configuration, loaded from `relay.toml` with
/// `RELAY__SECTION__KEY` environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub providers: ProviderConfig,
    pub heartbeat: HeartbeatConfig,
    pub reaper: ReaperConfig,
    pub gate: GateConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Credentials, base URLs, and routing tables for the three external
/// providers. Any vendor satisfying the abstract contract in spec §6 is
/// pluggable behind these fields — see `providers.rs`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub asr: AsrProviderConfig,
    pub mt: MtProviderConfig,
    pub tts: TtsProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AsrProviderConfig {
    pub primary_base_url: String,
    pub primary_api_key: String,
    pub secondary_base_url: String,
    pub secondary_api_key: String,
    pub batch_base_url: String,
    pub batch_api_key: String,
    /// Languages routed straight to the batch-mode provider rather than
    /// either streaming provider (data, not code — spec §4.5).
    pub batch_routed_languages: Vec<String>,
    pub keep_alive_interval_secs: u64,
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MtProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TtsProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub stream_idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReaperConfig {
    pub cadence_secs: u64,
    pub asr_idle_secs: u64,
    pub tts_idle_secs: u64,
    pub session_idle_secs: u64,
    pub pending_session_max_secs: u64,
    pub ended_session_grace_secs: u64,
    /// Window within which a matching (role, language, voiceId) rejoin
    /// swaps the transport handle instead of forming a new participant
    /// (spec §4.1 "Reconnection").
    pub reconnect_window_secs: u64,
}

/// Thresholds for the professional-conversation processor (spec §4.4, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    pub min_confidence_threshold: f64,
    pub min_words_for_processing: usize,
    pub min_characters_for_processing: usize,
    pub short_message_timeout_ms: u64,
    pub conversational_pause_threshold_ms: u64,
    pub sentence_completion_threshold_ms: u64,
    pub thought_completion_threshold_ms: u64,
    pub emergency_timeout_ms: u64,
    pub dedup_window_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub exact_hit_ttl_secs: u64,
    pub near_hit_ttl_secs: u64,
    pub max_retention_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl AppConfig {
    /// Load configuration from `relay.toml`, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("RELAY_CONFIG").unwrap_or_else(|_| "relay.toml".to_string());

        let builder = config::Config::builder();

        let builder = if Path::new(&config_path).exists() {
            builder.add_source(config::File::with_name(&config_path))
        } else {
            tracing::warn!("Config file '{}' not found, using defaults", config_path);
            builder
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        Ok(config)
    }
}
