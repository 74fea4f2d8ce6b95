/// Machine-translation client (spec §4.6).
///
/// `translate` wraps protected spans (dosages, times, numeric values) so
/// the provider cannot mangle them, enforces a request timeout, and
/// classifies errors so the orchestrator can decide whether to retry,
/// surface the failure, or treat the session as unrecoverable.
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::MtProviderConfig;
use crate::providers::{MtError, MtErrorKind};

#[derive(Debug, Clone)]
pub struct TranslationResult {
    pub translated_text: String,
    pub detected_language: Option<String>,
    pub confidence: f64,
}

/// Matches dosage-like tokens ("500mg", "2 mg"), clock times ("14:30",
/// "2:30pm"), and bare numeric values — spans MT providers are prone to
/// reformatting or mistranslating outright.
static PROTECTED_SPAN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b\d+(\.\d+)?\s?(mg|ml|mcg|g|kg|cc|units?)\b|\b\d{1,2}:\d{2}\s?(am|pm)?\b|\b\d+(\.\d+)?\b")
        .expect("protected span regex is valid")
});

const PLACEHOLDER_PREFIX: &str = "\u{2060}MTPH";

/// Wraps protected spans in inert placeholders before sending to the
/// provider, returning the text plus the spans to restore afterward.
fn protect_spans(text: &str) -> (String, Vec<String>) {
    let mut spans = Vec::new();
    let wrapped = PROTECTED_SPAN
        .replace_all(text, |caps: &regex::Captures| {
            let matched = caps.get(0).unwrap().as_str().to_string();
            let idx = spans.len();
            spans.push(matched);
            format!("{PLACEHOLDER_PREFIX}{idx}\u{2060}")
        })
        .into_owned();
    (wrapped, spans)
}

fn restore_spans(text: &str, spans: &[String]) -> String {
    let mut restored = text.to_string();
    for (idx, span) in spans.iter().enumerate() {
        let placeholder = format!("{PLACEHOLDER_PREFIX}{idx}\u{2060}");
        restored = restored.replace(&placeholder, span);
    }
    restored
}

pub struct MtClient {
    config: MtProviderConfig,
    http: reqwest::Client,
}

impl MtClient {
    pub fn new(config: MtProviderConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            config,
        }
    }

    /// Translate non-empty text. Callers must never invoke this on an
    /// empty string (spec §4.6) — the gate already guarantees that by
    /// construction, so this is not re-validated here. Network/5xx errors
    /// are retried exactly once; quota, auth, and other 4xx errors are
    /// surfaced immediately (spec §4.6, §7 "MT retries once only on
    /// network errors").
    pub async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<TranslationResult, MtError> {
        match self.translate_once(text, source_language, target_language).await {
            Err(e) if e.kind == MtErrorKind::NetworkOr5xx => {
                tracing::debug!("MT network/5xx error, retrying once: {}", e.message);
                self.translate_once(text, source_language, target_language).await
            }
            other => other,
        }
    }

    async fn translate_once(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<TranslationResult, MtError> {
        let (wrapped, spans) = protect_spans(text);

        let body = serde_json::json!({
            "text": wrapped,
            "source": source_language,
            "target": target_language,
        });

        let response = self
            .http
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 402 {
            return Err(MtError { kind: MtErrorKind::QuotaExhausted, message: format!("provider returned {status}") });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(MtError { kind: MtErrorKind::AuthInvalid, message: format!("provider returned {status}") });
        }
        if status.is_server_error() {
            return Err(MtError { kind: MtErrorKind::NetworkOr5xx, message: format!("provider returned {status}") });
        }
        if status.is_client_error() {
            return Err(MtError { kind: MtErrorKind::Other4xx, message: format!("provider returned {status}") });
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| MtError { kind: MtErrorKind::Other4xx, message: e.to_string() })?;

        let translated = value.get("translatedText").and_then(|v| v.as_str()).unwrap_or("");
        let detected = value.get("detectedLanguage").and_then(|v| v.as_str()).map(|s| s.to_string());
        let confidence = value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(1.0);

        Ok(TranslationResult {
            translated_text: restore_spans(translated, &spans),
            detected_language: detected,
            confidence,
        })
    }
}

fn classify_transport_error(e: &reqwest::Error) -> MtError {
    let kind = if e.is_timeout() || e.is_connect() {
        MtErrorKind::NetworkOr5xx
    } else {
        MtErrorKind::Other4xx
    };
    MtError { kind, message: e.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protects_and_restores_dosage_span() {
        let (wrapped, spans) = protect_spans("Take 500mg twice daily");
        assert!(!wrapped.contains("500mg"));
        let restored = restore_spans(&wrapped, &spans);
        assert_eq!(restored, "Take 500mg twice daily");
    }

    #[test]
    fn protects_clock_time() {
        let (wrapped, spans) = protect_spans("See you at 14:30 tomorrow");
        assert!(!wrapped.contains("14:30"));
        assert_eq!(restore_spans(&wrapped, &spans), "See you at 14:30 tomorrow");
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let (wrapped, spans) = protect_spans("hello there");
        assert_eq!(wrapped, "hello there");
        assert!(spans.is_empty());
    }
}
