use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::ServerMessage;

/// Application-wide error taxonomy (spec §7). Every variant is surfaced to
/// the *speaker's* transport only — errors never propagate to the partner,
/// and never unwind across a component boundary.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed join payload, unsupported language tag, missing voice id.
    #[error("Validation error: {0}")]
    Validation(String),

    /// ASR stream errors, REST fallback errors that could not be
    /// transparently recovered (transient sub-class is handled internally
    /// and never reaches this variant).
    #[error("Transcription error: {0}")]
    Transcription(String),

    /// MT quota exhaustion, auth failure, or persistent network error.
    #[error("Translation error: {0}")]
    Translation(String),

    /// TTS error other than a retried rate-limit.
    #[error("Synthesis error: {0}")]
    Synthesis(String),

    /// Client disconnect / heartbeat timeout. Never surfaced to the
    /// departed participant; used internally to drive partner notification.
    #[error("Transport error: {0}")]
    Transport(String),

    /// All ASR providers exhausted for a participant.
    #[error("Provider exhausted: {0}")]
    ProviderFatal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Convert to the typed server→client message the orchestrator emits
    /// to the speaker's transport for this error class.
    pub fn to_server_message(&self) -> ServerMessage {
        match self {
            AppError::Validation(msg) => ServerMessage::Error { message: msg.clone() },
            AppError::Transcription(msg) => {
                ServerMessage::TranscriptionError { message: msg.clone() }
            }
            AppError::Translation(msg) => ServerMessage::PipelineError { message: msg.clone() },
            AppError::Synthesis(msg) => ServerMessage::SynthesisError { message: msg.clone() },
            AppError::Transport(msg) => ServerMessage::Error { message: msg.clone() },
            AppError::ProviderFatal(msg) => ServerMessage::TranscriptionError { message: msg.clone() },
            AppError::NotFound(msg) => ServerMessage::Error { message: msg.clone() },
            AppError::Internal(_) => ServerMessage::Error {
                message: "internal error".to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Transcription(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Translation(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Synthesis(msg) => (StatusCode::BAD_GATEWAY, msg.clone()),
            AppError::Transport(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ProviderFatal(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(e) => {
                tracing::error!("internal error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        let body = json!({
            "error": {
                "code": status.as_u16(),
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
