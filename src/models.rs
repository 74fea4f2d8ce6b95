use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ParticipantId = Uuid;
pub type SessionId = Uuid;

/// Outbound channel to a participant's transport task. The registry and
/// pipeline only ever touch this handle, never the socket itself — the
/// socket is owned exclusively by the transport task (spec §9).
pub type OutboundSender = mpsc::UnboundedSender<ServerMessage>;

// ─── Participant & Session ─────────────────────────────────────────────────

/// Semantic identity of one speaker in a session (spec §3).
#[derive(Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub session_id: Option<SessionId>,
    pub role: String,
    pub language: String,
    pub voice_id: String,
    pub outbound: OutboundSender,
    pub joined_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Set when the transport disconnects; cleared on reconnect. The
    /// participant record is only destroyed once the registry's reconnect
    /// window elapses without a matching rejoin (spec §3 Participant
    /// lifecycle).
    pub disconnected_at: Option<DateTime<Utc>>,
}

impl Participant {
    /// Identity used for reconnection matching: same role, language, and
    /// voice id is considered "the same participant" rejoining.
    pub fn reconnect_key(&self) -> (String, String, String) {
        (self.role.clone(), self.language.clone(), self.voice_id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Active,
    Ended,
}

/// Rolling statistics kept per session (spec §3).
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub message_count: u64,
    pub translation_count: u64,
    pub cumulative_latency_ms: u64,
    pub rolling_avg_latency_ms: f64,
    pub error_count: u64,
}

impl SessionStats {
    pub fn record_latency(&mut self, total_ms: u64) {
        self.translation_count += 1;
        self.cumulative_latency_ms += total_ms;
        let n = self.translation_count as f64;
        self.rolling_avg_latency_ms += (total_ms as f64 - self.rolling_avg_latency_ms) / n;
    }

    pub fn record_error(&mut self) {
        self.error_count += 1;
    }
}

/// Binds exactly two participants speaking different source languages
/// (spec §3). A `Pending` session holds exactly one participant.
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    pub participants: Vec<ParticipantId>,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub stats: SessionStats,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new_pending(id: SessionId, first: ParticipantId) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: SessionStatus::Pending,
            participants: vec![first],
            created_at: now,
            ended_at: None,
            stats: SessionStats::default(),
            last_activity: now,
        }
    }

    pub fn partner_of(&self, participant_id: ParticipantId) -> Option<ParticipantId> {
        self.participants
            .iter()
            .copied()
            .find(|&id| id != participant_id)
    }
}

// ─── Utterance & conversation profile ──────────────────────────────────────

/// An immutable unit produced by the utterance gate (spec §3). The only
/// thing that triggers MT+TTS.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    pub source_language: String,
    pub confidence: f64,
    pub completion_score: f64,
    /// When the gate first saw a candidate for this utterance, before any
    /// partial-result accumulation — the basis for `transcription_ms`.
    pub started_at: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
    pub participant_id: ParticipantId,
}

/// Adaptive per-participant state used by the gate (spec §3). Mutated only
/// by the gate.
#[derive(Debug, Clone)]
pub struct ConversationProfile {
    pub avg_sentence_len: f64,
    pub avg_pause_ms: f64,
    pub confidence_window: std::collections::VecDeque<f64>,
    pub score_window: std::collections::VecDeque<f64>,
    pub total_utterances: u64,
    pub last_normalized: Option<String>,
    pub last_processed_at: Option<DateTime<Utc>>,
}

impl ConversationProfile {
    pub const CONFIDENCE_WINDOW_CAP: usize = 10;
    pub const SCORE_WINDOW_CAP: usize = 20;

    pub fn new() -> Self {
        Self {
            avg_sentence_len: 6.0,
            avg_pause_ms: 750.0,
            confidence_window: std::collections::VecDeque::with_capacity(Self::CONFIDENCE_WINDOW_CAP),
            score_window: std::collections::VecDeque::with_capacity(Self::SCORE_WINDOW_CAP),
            total_utterances: 0,
            last_normalized: None,
            last_processed_at: None,
        }
    }
}

impl Default for ConversationProfile {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Emotional profile ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    Surprised,
    Sarcastic,
    Excited,
    Calm,
    Urgent,
    Confident,
    Nervous,
}

impl Default for Emotion {
    fn default() -> Self {
        Emotion::Calm
    }
}

/// Voice-synthesis parameter bundle sent to the TTS provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub stability: f64,
    pub similarity_boost: f64,
    pub style: f64,
    pub use_speaker_boost: bool,
}

impl VoiceSettings {
    pub fn clamped(mut self) -> Self {
        self.stability = self.stability.clamp(0.0, 1.0);
        self.similarity_boost = self.similarity_boost.clamp(0.0, 1.0);
        self.style = self.style.clamp(0.0, 1.0);
        self
    }

    pub fn neutral() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.75,
            style: 0.3,
            use_speaker_boost: true,
        }
    }
}

/// Transient per-utterance emotional profile (spec §3). Rebuilt per
/// utterance, never persisted.
#[derive(Debug, Clone)]
pub struct EmotionalProfile {
    pub primary_emotion: Emotion,
    pub intensity: f64,
    pub confidence: f64,
    pub tonality: String,
    pub voice_settings: VoiceSettings,
    pub cultural_context: Option<String>,
}

impl EmotionalProfile {
    pub fn neutral_default() -> Self {
        Self {
            primary_emotion: Emotion::Calm,
            intensity: 0.2,
            confidence: 0.0,
            tonality: "neutral".to_string(),
            voice_settings: VoiceSettings::neutral(),
            cultural_context: None,
        }
    }

    pub fn summary(&self) -> EmotionSummary {
        EmotionSummary {
            primary_emotion: self.primary_emotion,
            intensity: self.intensity,
            tonality: self.tonality.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmotionSummary {
    pub primary_emotion: Emotion,
    pub intensity: f64,
    pub tonality: String,
}

// ─── Synthesis cache ────────────────────────────────────────────────────────

/// Key: (voice-id, normalized-text, target-language, emotion-bucket)
/// (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SynthesisCacheKey {
    pub voice_id: String,
    pub normalized_text: String,
    pub target_language: String,
    pub emotion_bucket: String,
}

#[derive(Clone)]
pub struct SynthesisCacheEntry {
    pub audio: std::sync::Arc<Vec<u8>>,
    pub created_at: tokio::time::Instant,
}

// ─── Wire protocol ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerTag {
    #[serde(rename = "self")]
    SelfSpeaker,
    Partner,
}

/// Client → server control messages (spec §6). Audio frames may also
/// arrive as raw binary WebSocket frames; this variant covers the
/// base64-carrying JSON alternative.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    JoinSession {
        role: String,
        language: String,
        #[serde(rename = "voiceId")]
        voice_id: String,
    },
    StreamingAudio {
        data: String,
    },
    HeartbeatPong,
}

/// Server → client notifications (spec §4.1).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    SessionJoined {
        session_id: SessionId,
    },
    WaitingForPartner,
    SessionReady {
        session_id: SessionId,
        partner_language: String,
        partner_role: String,
    },
    LiveTranscription {
        text: String,
        is_partial: bool,
        confidence: f64,
        language: String,
    },
    LiveTranslation {
        original_text: String,
        translated_text: String,
        source_language: String,
        target_language: String,
        confidence: f64,
        emotion: Option<EmotionSummary>,
        speaker: SpeakerTag,
    },
    SynthesizedAudio {
        data: String,
        target_language: String,
        is_final: bool,
    },
    LatencyStats {
        transcription_ms: u64,
        translation_ms: u64,
        total_ms: u64,
    },
    PipelineError {
        message: String,
    },
    TranscriptionError {
        message: String,
    },
    SynthesisError {
        message: String,
    },
    PartnerDisconnected,
    Heartbeat,
    Error {
        message: String,
    },
}
