/// Text-to-speech client (spec §4.7).
///
/// Deduplicates identical (voice, text, language, emotion-bucket) calls
/// within a short window, retries rate-limited requests with exponential
/// backoff, and gates partial-utterance calls on a minimum length so the
/// provider isn't hammered with near-empty synthesis requests.
use std::sync::Arc;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::TtsProviderConfig;
use crate::models::{SynthesisCacheEntry, SynthesisCacheKey, VoiceSettings};
use crate::providers::{TtsError, TtsErrorKind};

/// Minimums below which a partial (non-final) synthesis call is skipped
/// entirely rather than sent to the provider (spec §4.7).
const PARTIAL_MIN_CHARS: usize = 20;
const PARTIAL_MIN_WORDS: usize = 4;

pub struct SynthesisOutcome {
    pub audio: Arc<Vec<u8>>,
    pub cache_hit: bool,
}

pub struct TtsClient {
    config: TtsProviderConfig,
    http: reqwest::Client,
    cache: DashMap<SynthesisCacheKey, SynthesisCacheEntry>,
    exact_hit_ttl: std::time::Duration,
    near_hit_ttl: std::time::Duration,
    max_retention: std::time::Duration,
}

impl TtsClient {
    pub fn new(config: TtsProviderConfig, cache: &crate::config::CacheConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            config,
            cache: DashMap::new(),
            exact_hit_ttl: std::time::Duration::from_secs(cache.exact_hit_ttl_secs),
            near_hit_ttl: std::time::Duration::from_secs(cache.near_hit_ttl_secs),
            max_retention: std::time::Duration::from_secs(cache.max_retention_secs),
        }
    }

    /// Synthesize `text` for `voice_id`/`target_language`, applying the
    /// partial-call length gate unless `is_final`. Returns `Ok(None)` when
    /// the call was skipped, not failed.
    pub async fn synthesize(
        &self,
        voice_id: &str,
        text: &str,
        target_language: &str,
        voice_settings: VoiceSettings,
        emotion_bucket: &str,
        is_final: bool,
    ) -> Result<Option<SynthesisOutcome>, TtsError> {
        if text.is_empty() {
            return Ok(None);
        }
        if !is_final {
            let words = text.split_whitespace().count();
            if text.len() < PARTIAL_MIN_CHARS || words < PARTIAL_MIN_WORDS {
                return Ok(None);
            }
        }

        let key = SynthesisCacheKey {
            voice_id: voice_id.to_string(),
            normalized_text: crate::text::normalize(text),
            target_language: target_language.to_string(),
            emotion_bucket: emotion_bucket.to_string(),
        };

        if let Some(hit) = self.lookup_cache(&key) {
            return Ok(Some(SynthesisOutcome { audio: hit, cache_hit: true }));
        }

        let audio = self.call_provider_with_retry(voice_id, text, target_language, voice_settings).await?;
        let audio = Arc::new(audio);
        self.evict_expired();
        self.cache.insert(key, SynthesisCacheEntry { audio: audio.clone(), created_at: Instant::now() });

        Ok(Some(SynthesisOutcome { audio, cache_hit: false }))
    }

    /// Exact-hit TTL uses the full key (including emotion bucket);
    /// near-hit TTL ignores the emotion bucket, trading expressiveness
    /// for a longer dedup window on otherwise-identical text (spec §4.7).
    fn lookup_cache(&self, key: &SynthesisCacheKey) -> Option<Arc<Vec<u8>>> {
        if let Some(entry) = self.cache.get(key) {
            if entry.created_at.elapsed() < self.exact_hit_ttl {
                return Some(entry.audio.clone());
            }
        }

        let near_hit = self.cache.iter().find(|e| {
            e.key().voice_id == key.voice_id
                && e.key().normalized_text == key.normalized_text
                && e.key().target_language == key.target_language
                && e.value().created_at.elapsed() < self.near_hit_ttl
        });
        near_hit.map(|e| e.value().audio.clone())
    }

    fn evict_expired(&self) {
        let max_retention = self.max_retention;
        self.cache.retain(|_, v| v.created_at.elapsed() < max_retention);
    }

    /// Background reaper duty mirroring `evict_expired`, exposed so the
    /// reaper can drive cache eviction on its own cadence even when no
    /// synthesis call happens to trigger it (spec §5).
    pub fn sweep_expired(&self) {
        self.evict_expired();
    }

    async fn call_provider_with_retry(
        &self,
        voice_id: &str,
        text: &str,
        target_language: &str,
        voice_settings: VoiceSettings,
    ) -> Result<Vec<u8>, TtsError> {
        let mut attempt = 0;
        loop {
            match self.call_provider(voice_id, text, target_language, voice_settings).await {
                Ok(audio) => return Ok(audio),
                Err(e) if e.kind == TtsErrorKind::RateLimited && attempt + 1 < self.config.max_retries => {
                    let backoff_ms = self.config.backoff_base_ms * (1 << attempt);
                    tracing::debug!(attempt, backoff_ms, "TTS rate limited, backing off");
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_provider(
        &self,
        voice_id: &str,
        text: &str,
        target_language: &str,
        voice_settings: VoiceSettings,
    ) -> Result<Vec<u8>, TtsError> {
        let body = serde_json::json!({
            "voiceId": voice_id,
            "text": text,
            "language": target_language,
            "voiceSettings": {
                "stability": voice_settings.stability,
                "similarityBoost": voice_settings.similarity_boost,
                "style": voice_settings.style,
                "useSpeakerBoost": voice_settings.use_speaker_boost,
            },
        });

        let response = self
            .http
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TtsError { kind: TtsErrorKind::Other, message: e.to_string() })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(TtsError { kind: TtsErrorKind::RateLimited, message: "provider rate limit".to_string() });
        }
        if !response.status().is_success() {
            return Err(TtsError {
                kind: TtsErrorKind::Other,
                message: format!("provider returned {}", response.status()),
            });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| TtsError { kind: TtsErrorKind::Other, message: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> (TtsProviderConfig, crate::config::CacheConfig) {
        (
            TtsProviderConfig {
                base_url: "https://example.invalid/tts".to_string(),
                api_key: "key".to_string(),
                max_retries: 3,
                backoff_base_ms: 1000,
                stream_idle_timeout_secs: 300,
            },
            crate::config::CacheConfig {
                exact_hit_ttl_secs: 5,
                near_hit_ttl_secs: 3,
                max_retention_secs: 10,
            },
        )
    }

    #[tokio::test]
    async fn skips_partial_call_below_minimum_length() {
        let (cfg, cache) = test_config();
        let client = TtsClient::new(cfg, &cache);
        let result = client
            .synthesize("voice-1", "hi", "en", VoiceSettings::neutral(), "calm", false)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn skips_empty_final_call() {
        let (cfg, cache) = test_config();
        let client = TtsClient::new(cfg, &cache);
        let result = client
            .synthesize("voice-1", "", "en", VoiceSettings::neutral(), "calm", true)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
