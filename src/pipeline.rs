/// Per-participant orchestrator (spec §4.3). One task per participant,
/// spawned on join and torn down on disconnect. Wires
/// ASR → gate → (MT ∥ emotion) → TTS → partner routing. Mutable pipeline
/// state (the gate, the ASR handle, the rolling audio buffer) is owned
/// exclusively by this task — nothing outside it ever touches them
/// directly (spec §9).
use std::collections::VecDeque;
use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::asr::{AsrClient, AsrEvent};
use crate::config::GateConfig;
use crate::emotion;
use crate::error::AppError;
use crate::gate::{GateDecision, UtteranceGate};
use crate::models::{ParticipantId, ServerMessage, SpeakerTag, Utterance};
use crate::mt::MtClient;
use crate::registry::SessionRegistry;
use crate::tts::TtsClient;

/// 5 seconds of 16kHz mono 16-bit PCM (spec §4.8's rolling buffer cap).
const AUDIO_BUFFER_CAP_BYTES: usize = 16_000 * 2 * 5;

pub struct PipelineHandle {
    pub audio_tx: mpsc::UnboundedSender<Vec<u8>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl PipelineHandle {
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub struct PipelineDeps {
    pub registry: Arc<SessionRegistry>,
    pub asr: Arc<AsrClient>,
    pub mt: Arc<MtClient>,
    pub tts: Arc<TtsClient>,
    pub gate_config: GateConfig,
}

pub fn spawn(
    participant_id: ParticipantId,
    role: String,
    language: String,
    voice_id: String,
    deps: Arc<PipelineDeps>,
) -> PipelineHandle {
    let (audio_tx, audio_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(run(participant_id, role, language, voice_id, deps, audio_rx, shutdown_rx));

    PipelineHandle { audio_tx, shutdown_tx: Some(shutdown_tx) }
}

async fn run(
    participant_id: ParticipantId,
    role: String,
    language: String,
    voice_id: String,
    deps: Arc<PipelineDeps>,
    mut audio_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let (asr_handle, mut asr_events) = deps.asr.open(participant_id, language.clone()).await;
    let mut gate = UtteranceGate::new(language.clone(), role, deps.gate_config.clone());
    let mut audio_buffer: VecDeque<u8> = VecDeque::with_capacity(AUDIO_BUFFER_CAP_BYTES);

    let mut pending_timer: Option<(std::pin::Pin<Box<tokio::time::Sleep>>, u64)> = None;

    loop {
        let timer_fut = async {
            match &mut pending_timer {
                Some((sleep, token)) => {
                    sleep.as_mut().await;
                    *token
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            _ = &mut shutdown_rx => break,

            frame = audio_rx.recv() => {
                match frame {
                    Some(bytes) => {
                        push_bounded_bytes(&mut audio_buffer, &bytes, AUDIO_BUFFER_CAP_BYTES);
                        if let Err(e) = deps.asr.submit_frame(asr_handle, bytes) {
                            tracing::warn!(participant = %participant_id, "ASR submit failed: {e}");
                        }
                    }
                    None => break,
                }
            }

            event = asr_events.recv() => {
                match event {
                    Some(AsrEvent::Partial(result)) => {
                        send_transcription(&deps, participant_id, &result.text, true, result.confidence, &result.language);
                        let decision = gate.consider(&result.text, result.confidence, false, participant_id);
                        apply_decision(decision, &mut pending_timer, &deps, &audio_buffer).await;
                    }
                    Some(AsrEvent::Final(result)) => {
                        send_transcription(&deps, participant_id, &result.text, false, result.confidence, &result.language);
                        let decision = gate.consider(&result.text, result.confidence, true, participant_id);
                        apply_decision(decision, &mut pending_timer, &deps, &audio_buffer).await;
                    }
                    Some(AsrEvent::Error(e)) => {
                        // Recoverable timeouts are recreated transparently
                        // inside `asr.rs` and never reach here; anything
                        // that does is persistent (spec §7) — surface once
                        // and stop this participant's ASR until reconnect.
                        tracing::warn!(participant = %participant_id, "ASR error: {e}");
                        notify_speaker(&deps, participant_id, AppError::Transcription(e.message));
                        break;
                    }
                    None => break,
                }
            }

            token = timer_fut => {
                pending_timer = None;
                if let Some(utterance) = gate.timer_fired(token, participant_id) {
                    process_utterance(&deps, utterance, &audio_buffer).await;
                }
            }
        }
    }

    deps.asr.close(asr_handle);
}

fn push_bounded_bytes(buffer: &mut VecDeque<u8>, bytes: &[u8], cap: usize) {
    buffer.extend(bytes.iter().copied());
    while buffer.len() > cap {
        buffer.pop_front();
    }
}

async fn apply_decision(
    decision: GateDecision,
    pending_timer: &mut Option<(std::pin::Pin<Box<tokio::time::Sleep>>, u64)>,
    deps: &Arc<PipelineDeps>,
    audio_buffer: &VecDeque<u8>,
) {
    match decision {
        GateDecision::Dropped | GateDecision::Continue => {}
        GateDecision::Fire(utterance) => {
            *pending_timer = None;
            process_utterance(deps, utterance, audio_buffer).await;
        }
        GateDecision::ScheduleTimer { after_ms, token } => {
            let sleep = tokio::time::sleep(std::time::Duration::from_millis(after_ms));
            *pending_timer = Some((Box::pin(sleep), token));
        }
    }
}

fn send_transcription(
    deps: &Arc<PipelineDeps>,
    participant_id: ParticipantId,
    text: &str,
    is_partial: bool,
    confidence: f64,
    language: &str,
) {
    if let Some(participant) = deps.registry.get_participant(participant_id) {
        let _ = participant.outbound.send(ServerMessage::LiveTranscription {
            text: text.to_string(),
            is_partial,
            confidence,
            language: language.to_string(),
        });
    }
}

fn notify_speaker(deps: &Arc<PipelineDeps>, participant_id: ParticipantId, error: AppError) {
    if let Some(participant) = deps.registry.get_participant(participant_id) {
        let _ = participant.outbound.send(error.to_server_message());
    }
    if let Some(session_id) = deps.registry.get_participant(participant_id).and_then(|p| p.session_id) {
        deps.registry.with_session_mut(session_id, |s| s.stats.record_error());
    }
}

/// The core per-utterance flow: emotion analysis runs alongside
/// translation since neither depends on the other's output, then
/// synthesis and partner routing depend on both.
async fn process_utterance(deps: &Arc<PipelineDeps>, utterance: Utterance, audio_buffer: &VecDeque<u8>) {
    let speaker_id = utterance.participant_id;
    let Some(partner_id) = deps.registry.find_partner(speaker_id) else {
        // No partner yet (still Pending) — nothing to route to.
        return;
    };
    let Some(speaker) = deps.registry.get_participant(speaker_id) else { return };
    let Some(partner) = deps.registry.get_participant(partner_id) else { return };

    let transcription_ms = (utterance.timestamp - utterance.started_at).num_milliseconds().max(0) as u64;
    let pipeline_started = utterance.started_at.timestamp_millis();
    let audio_snapshot: Vec<u8> = audio_buffer.iter().copied().collect();

    let translation_started = Utc::now();
    let (emotional_profile, translation) = tokio::join!(
        async { emotion::analyze(&audio_snapshot, &utterance.text, &utterance.source_language) },
        deps.mt.translate(&utterance.text, &utterance.source_language, &partner.language),
    );
    let translation_ms = (Utc::now() - translation_started).num_milliseconds().max(0) as u64;

    let translated = match translation {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(participant = %speaker_id, "MT error: {e}");
            notify_speaker(deps, speaker_id, AppError::Translation(e.message));
            return;
        }
    };

    if translated.translated_text.trim().is_empty() {
        notify_speaker(deps, speaker_id, AppError::Translation("empty translation result".to_string()));
        return;
    }

    let summary = emotional_profile.summary();

    let _ = speaker.outbound.send(ServerMessage::LiveTranslation {
        original_text: utterance.text.clone(),
        translated_text: translated.translated_text.clone(),
        source_language: utterance.source_language.clone(),
        target_language: partner.language.clone(),
        confidence: translated.confidence,
        emotion: Some(summary.clone()),
        speaker: SpeakerTag::SelfSpeaker,
    });
    let _ = partner.outbound.send(ServerMessage::LiveTranslation {
        original_text: utterance.text.clone(),
        translated_text: translated.translated_text.clone(),
        source_language: utterance.source_language.clone(),
        target_language: partner.language.clone(),
        confidence: translated.confidence,
        emotion: Some(summary.clone()),
        speaker: SpeakerTag::Partner,
    });

    let emotion_bucket = format!("{:?}", emotional_profile.primary_emotion);
    match deps
        .tts
        .synthesize(
            &partner.voice_id,
            &translated.translated_text,
            &partner.language,
            emotional_profile.voice_settings,
            &emotion_bucket,
            true,
        )
        .await
    {
        Ok(Some(outcome)) => {
            // Synthesized audio is only ever routed to the partner — the
            // speaker already has the source audio (spec §4.3 point 6).
            let encoded = base64::engine::general_purpose::STANDARD.encode(outcome.audio.as_slice());
            let _ = partner.outbound.send(ServerMessage::SynthesizedAudio {
                data: encoded,
                target_language: partner.language.clone(),
                is_final: true,
            });
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(participant = %speaker_id, "TTS error: {e}");
            notify_speaker(deps, speaker_id, AppError::Synthesis(e.message));
        }
    }

    let total_ms = (Utc::now().timestamp_millis() - pipeline_started).max(0) as u64;
    let _ = speaker.outbound.send(ServerMessage::LatencyStats {
        transcription_ms,
        translation_ms,
        total_ms,
    });

    if let Some(session_id) = speaker.session_id {
        deps.registry.with_session_mut(session_id, |s| s.stats.record_latency(total_ms));
    }
}
