/// Abstract vendor contracts (spec §6). Any vendor satisfying these shapes
/// is pluggable behind the concrete HTTP/WS clients in `asr.rs`, `mt.rs`,
/// and `tts.rs` — the orchestrator never sees provider-specific fields.

/// Normalized ASR output, identical regardless of which provider produced
/// it (spec §4.5 "Provider call outputs are normalized into a single
/// shape").
#[derive(Debug, Clone)]
pub struct AsrResult {
    pub text: String,
    pub confidence: f64,
    pub language: String,
    pub is_final: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsrErrorKind {
    /// Provider-defined timeout — transparently recreate the stream.
    Timeout,
    /// Non-recoverable stream close (e.g. protocol errors 1006/1011) —
    /// fall back to the next provider in priority order.
    NonRecoverable,
    /// Any other provider error, surfaced to the caller.
    Other,
}

#[derive(Debug)]
pub struct AsrError {
    pub kind: AsrErrorKind,
    pub message: String,
}

impl std::fmt::Display for AsrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for AsrError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtErrorKind {
    QuotaExhausted,
    AuthInvalid,
    NetworkOr5xx,
    Other4xx,
}

#[derive(Debug)]
pub struct MtError {
    pub kind: MtErrorKind,
    pub message: String,
}

impl std::fmt::Display for MtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for MtError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtsErrorKind {
    RateLimited,
    Other,
}

#[derive(Debug)]
pub struct TtsError {
    pub kind: TtsErrorKind,
    pub message: String,
}

impl std::fmt::Display for TtsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TtsError {}
