/// ASR client — provider multiplexing (spec §4.5).
///
/// Offers the uniform contract `Open/SubmitFrame/Close`. Internally tries
/// providers in priority order: primary streaming → secondary streaming →
/// batch-mode (for languages known to behave badly on the streaming
/// providers) → REST-chunked fallback against the primary. Provider
/// output is normalized into `AsrResult` before it reaches the
/// orchestrator — callers never see provider-specific fields (spec §9:
/// tagged variants behind one interface, not a class hierarchy).
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use crate::config::AsrProviderConfig;
use crate::providers::{AsrError, AsrErrorKind, AsrResult};

pub type AsrHandleId = Uuid;

/// Events delivered on a handle's channel — two explicit kinds (data,
/// error) per spec §9, never buried in closures.
#[derive(Debug)]
pub enum AsrEvent {
    Partial(AsrResult),
    Final(AsrResult),
    Error(AsrError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderKind {
    StreamingPrimary,
    StreamingSecondary,
    Batch,
    RestFallback,
}

struct HandleState {
    participant_id: Uuid,
    language: String,
    kind: ProviderKind,
    last_activity: AtomicI64,
    frame_tx: mpsc::UnboundedSender<Vec<u8>>,
    /// Sends a close request into the provider task.
    close_tx: mpsc::UnboundedSender<()>,
    /// Per-handle buffer for the REST-chunked fallback path.
    rest_buffer: tokio::sync::Mutex<Vec<u8>>,
}

/// Multiplexes ASR providers behind one handle type.
pub struct AsrClient {
    config: AsrProviderConfig,
    http: reqwest::Client,
    handles: DashMap<AsrHandleId, Arc<HandleState>>,
}

/// ~1 second of 16kHz mono 16-bit PCM is 32000 bytes; REST-chunked
/// fallback batches roughly this much audio per language (spec §4.5).
fn rest_chunk_bytes(language: &str) -> usize {
    // Languages with longer average word length batch ~1.5s; others ~2s.
    const BYTES_PER_SEC: usize = 32_000;
    match language {
        "de" | "fi" | "tr" | "hu" => (BYTES_PER_SEC as f64 * 1.5) as usize,
        _ => BYTES_PER_SEC * 2,
    }
}

impl AsrClient {
    pub fn new(config: AsrProviderConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            config,
            handles: DashMap::new(),
        }
    }

    /// Open a new ASR stream for a participant, trying providers in
    /// priority order. Returns the handle id plus an event receiver the
    /// caller (pipeline task) polls for partials/finals/errors.
    pub async fn open(
        &self,
        participant_id: Uuid,
        language: String,
    ) -> (AsrHandleId, mpsc::UnboundedReceiver<AsrEvent>) {
        let handle_id = Uuid::now_v7();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = mpsc::unbounded_channel();

        let routed_to_batch = self
            .config
            .batch_routed_languages
            .iter()
            .any(|l| l.eq_ignore_ascii_case(&language));

        let kind = if routed_to_batch {
            ProviderKind::Batch
        } else {
            ProviderKind::StreamingPrimary
        };

        let state = Arc::new(HandleState {
            participant_id,
            language: language.clone(),
            kind,
            last_activity: AtomicI64::new(Utc::now().timestamp_millis()),
            frame_tx,
            close_tx,
            rest_buffer: tokio::sync::Mutex::new(Vec::new()),
        });
        self.handles.insert(handle_id, state.clone());

        match kind {
            ProviderKind::Batch => {
                self.spawn_batch_task(handle_id, state, frame_rx, close_rx, event_tx);
            }
            _ => {
                self.spawn_streaming_task(handle_id, state, frame_rx, close_rx, event_tx);
            }
        }

        (handle_id, event_rx)
    }

    pub fn submit_frame(&self, handle_id: AsrHandleId, bytes: Vec<u8>) -> Result<(), AsrError> {
        let Some(state) = self.handles.get(&handle_id) else {
            return Err(AsrError {
                kind: AsrErrorKind::Other,
                message: "unknown ASR handle".to_string(),
            });
        };
        state.last_activity.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        state.frame_tx.send(bytes).map_err(|_| AsrError {
            kind: AsrErrorKind::NonRecoverable,
            message: "ASR provider task no longer running".to_string(),
        })
    }

    pub fn close(&self, handle_id: AsrHandleId) {
        if let Some((_, state)) = self.handles.remove(&handle_id) {
            let _ = state.close_tx.send(());
        }
    }

    /// Background reaper duty: close handles idle longer than `idle`
    /// (spec §4.5 "Inactivity sweep", §5).
    pub fn sweep_idle(&self, idle: chrono::Duration) {
        let cutoff = Utc::now().timestamp_millis() - idle.num_milliseconds();
        let stale: Vec<AsrHandleId> = self
            .handles
            .iter()
            .filter(|e| e.value().last_activity.load(Ordering::Relaxed) < cutoff)
            .map(|e| *e.key())
            .collect();
        for id in stale {
            tracing::debug!(handle = %id, "closing idle ASR handle");
            self.close(id);
        }
    }

    /// Drives the streaming provider for the lifetime of the handle. A
    /// classified-timeout error silently recreates the connection — the
    /// caller never observes a gap event and the handle id is unchanged
    /// (spec §4.5, §8 testable property 9, scenario S8). A non-recoverable
    /// close (protocol errors 1006/1011, or failure to open at all) falls
    /// back to REST-chunked recognition transparently. Any other error is
    /// surfaced once and this task exits, leaving the participant's ASR
    /// stopped until reconnect (spec §7 "Provider-fatal").
    fn spawn_streaming_task(
        &self,
        handle_id: AsrHandleId,
        state: Arc<HandleState>,
        mut frame_rx: mpsc::UnboundedReceiver<Vec<u8>>,
        mut close_rx: mpsc::UnboundedReceiver<()>,
        event_tx: mpsc::UnboundedSender<AsrEvent>,
    ) {
        let config = self.config.clone();
        let http = self.http.clone();
        tokio::spawn(async move {
            let (base_url, api_key) = (config.primary_base_url.clone(), config.primary_api_key.clone());
            let keep_alive = std::time::Duration::from_secs(config.keep_alive_interval_secs);

            'reconnect: loop {
                match connect_streaming(&base_url, &api_key, &state.language).await {
                    Ok((mut ws_sink, mut ws_stream)) => {
                        let mut keep_alive_ticker = tokio::time::interval(keep_alive);
                        keep_alive_ticker.tick().await; // first tick fires immediately

                        loop {
                            tokio::select! {
                                frame = frame_rx.recv() => {
                                    match frame {
                                        Some(bytes) => {
                                            if ws_sink.send(WsMessage::Binary(bytes)).await.is_err() {
                                                tracing::debug!(handle = %handle_id, "stream write failed, recreating");
                                                continue 'reconnect;
                                            }
                                        }
                                        None => return,
                                    }
                                }
                                msg = ws_stream.next() => {
                                    match msg {
                                        Some(Ok(WsMessage::Text(text))) => {
                                            if let Some(result) = parse_provider_event(&text, &state.language) {
                                                let event = if result.is_final {
                                                    AsrEvent::Final(result)
                                                } else {
                                                    AsrEvent::Partial(result)
                                                };
                                                let _ = event_tx.send(event);
                                            }
                                        }
                                        Some(Ok(WsMessage::Close(frame))) => {
                                            let code = frame.as_ref().map(|f| u16::from(f.code)).unwrap_or(1000);
                                            match classify_close_code(code) {
                                                AsrErrorKind::Timeout => {
                                                    tracing::debug!(handle = %handle_id, "stream timeout, recreating");
                                                    continue 'reconnect;
                                                }
                                                AsrErrorKind::NonRecoverable => {
                                                    tracing::warn!(handle = %handle_id, "stream closed ({code}), falling back to REST");
                                                    run_rest_fallback(http, config, state, frame_rx, close_rx, event_tx).await;
                                                    return;
                                                }
                                                AsrErrorKind::Other => {
                                                    let _ = event_tx.send(AsrEvent::Error(AsrError {
                                                        kind: AsrErrorKind::Other,
                                                        message: format!("provider closed stream ({code})"),
                                                    }));
                                                    return;
                                                }
                                            }
                                        }
                                        Some(Err(_)) => {
                                            tracing::debug!(handle = %handle_id, "stream read error, recreating");
                                            continue 'reconnect;
                                        }
                                        Some(Ok(_)) => {}
                                        None => return,
                                    }
                                }
                                _ = keep_alive_ticker.tick() => {
                                    let _ = ws_sink.send(WsMessage::Ping(Vec::new())).await;
                                }
                                _ = close_rx.recv() => {
                                    let _ = ws_sink.send(WsMessage::Close(None)).await;
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(handle = %handle_id, "streaming ASR open failed, falling back: {e}");
                        run_rest_fallback(http, config, state, frame_rx, close_rx, event_tx).await;
                        return;
                    }
                }
            }
        });
    }

    fn spawn_batch_task(
        &self,
        _handle_id: AsrHandleId,
        state: Arc<HandleState>,
        frame_rx: mpsc::UnboundedReceiver<Vec<u8>>,
        close_rx: mpsc::UnboundedReceiver<()>,
        event_tx: mpsc::UnboundedSender<AsrEvent>,
    ) {
        let http = self.http.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            run_rest_fallback(http, config, state, frame_rx, close_rx, event_tx).await;
        });
    }
}

async fn run_rest_fallback(
    http: reqwest::Client,
    config: AsrProviderConfig,
    state: Arc<HandleState>,
    mut frame_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut close_rx: mpsc::UnboundedReceiver<()>,
    event_tx: mpsc::UnboundedSender<AsrEvent>,
) {
    let chunk_target = rest_chunk_bytes(&state.language);
    loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                let Some(bytes) = frame else { break };
                let mut buffer = state.rest_buffer.lock().await;
                buffer.extend_from_slice(&bytes);
                if buffer.len() >= chunk_target {
                    let chunk = std::mem::take(&mut *buffer);
                    drop(buffer);
                    match recognize_batch(&http, &config, &state.language, &chunk).await {
                        Ok(result) => {
                            let _ = event_tx.send(AsrEvent::Final(result));
                        }
                        Err(e) => {
                            let _ = event_tx.send(AsrEvent::Error(e));
                        }
                    }
                }
            }
            _ = close_rx.recv() => break,
        }
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;
type WsSource =
    futures_util::stream::SplitStream<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>>;

async fn connect_streaming(
    base_url: &str,
    api_key: &str,
    language: &str,
) -> anyhow::Result<(WsSink, WsSource)> {
    let url = format!("{base_url}?model=streaming&language={language}&api_key={api_key}");
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
    let (mut sink, stream) = ws_stream.split();

    let config_msg = serde_json::json!({ "type": "configure", "language": language, "encoding": "pcm16le", "sample_rate": 16000 });
    sink.send(WsMessage::Text(config_msg.to_string())).await?;

    Ok((sink, stream))
}

fn parse_provider_event(text: &str, language: &str) -> Option<AsrResult> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let transcript = value.get("text")?.as_str()?.to_string();
    let confidence = value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5);
    let is_final = value.get("isFinal").and_then(|v| v.as_bool()).unwrap_or(false);
    Some(AsrResult {
        text: transcript,
        confidence,
        language: language.to_string(),
        is_final,
        timestamp: Utc::now(),
    })
}

fn classify_close_code(code: u16) -> AsrErrorKind {
    match code {
        1006 | 1011 => AsrErrorKind::NonRecoverable,
        1000 | 1001 => AsrErrorKind::Other,
        _ => AsrErrorKind::Timeout,
    }
}

async fn recognize_batch(
    http: &reqwest::Client,
    config: &AsrProviderConfig,
    language: &str,
    audio: &[u8],
) -> Result<AsrResult, AsrError> {
    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, audio);
    let body = serde_json::json!({
        "language": language,
        "encoding": "pcm16le",
        "sample_rate": 16000,
        "audio": encoded,
    });

    let response = http
        .post(&config.batch_base_url)
        .bearer_auth(&config.batch_api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| AsrError { kind: AsrErrorKind::Other, message: e.to_string() })?;

    if !response.status().is_success() {
        return Err(AsrError {
            kind: AsrErrorKind::Other,
            message: format!("batch ASR returned {}", response.status()),
        });
    }

    let value: serde_json::Value = response
        .json()
        .await
        .map_err(|e| AsrError { kind: AsrErrorKind::Other, message: e.to_string() })?;

    let text = value.get("text").and_then(|v| v.as_str()).unwrap_or("").to_string();
    let confidence = value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5);

    Ok(AsrResult {
        text,
        confidence,
        language: language.to_string(),
        is_final: true,
        timestamp: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_chunk_bytes_differs_by_language() {
        assert!(rest_chunk_bytes("de") < rest_chunk_bytes("en"));
    }

    #[test]
    fn classifies_protocol_errors_as_non_recoverable() {
        assert_eq!(classify_close_code(1006), AsrErrorKind::NonRecoverable);
        assert_eq!(classify_close_code(1011), AsrErrorKind::NonRecoverable);
    }

    #[test]
    fn parses_provider_partial_event() {
        let json = r#"{"text": "hello", "confidence": 0.9, "isFinal": false}"#;
        let result = parse_provider_event(json, "en").unwrap();
        assert_eq!(result.text, "hello");
        assert!(!result.is_final);
    }
}
