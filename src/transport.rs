/// WebSocket transport (spec §6). One route, `/ws`: a participant sends
/// `join-session`, optionally reconnecting into an existing slot, then
/// streams audio and receives the full stack of server→client messages.
/// A plain `/healthz` route covers liveness.
///
/// Split-socket + paired forward/receive tasks racing on
/// `tokio::select!`, the same shape the gateway in this codebase has
/// always used — aborting whichever side didn't close first.
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use base64::Engine;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::config::HeartbeatConfig;
use crate::models::{ClientMessage, OutboundSender, ParticipantId, ServerMessage};
use crate::pipeline::{self, PipelineDeps, PipelineHandle};
use crate::registry::{JoinOutcome, SessionRegistry};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub pipeline_deps: Arc<PipelineDeps>,
    pub heartbeat: HeartbeatConfig,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // First message off the wire must be `join-session` (spec §4.1).
    let join = match receiver.next().await {
        Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::JoinSession { role, language, voice_id }) => (role, language, voice_id),
            _ => {
                close_with(&mut sender, 1000, "expected join-session").await;
                return;
            }
        },
        _ => {
            close_with(&mut sender, 1000, "no message received").await;
            return;
        }
    };
    let (role, language, voice_id) = join;

    let outcome = match state.registry.add_user(role.clone(), language.clone(), voice_id.clone(), outbound_tx.clone()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let _ = sender.send(to_ws(&e.to_server_message())).await;
            close_with(&mut sender, 1000, "join rejected").await;
            return;
        }
    };

    let participant_id = match outcome {
        JoinOutcome::Paired { participant_id, .. } | JoinOutcome::Waiting { participant_id, .. } => participant_id,
    };

    send_join_response(&outbound_tx, &state, &outcome, participant_id, &role, &language);

    let mut pipeline_handle = pipeline::spawn(
        participant_id,
        role,
        language,
        voice_id,
        state.pipeline_deps.clone(),
    );

    let heartbeat_interval = Duration::from_secs(state.heartbeat.interval_secs);

    let mut forward_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(to_ws(&message)).await.is_err() {
                break;
            }
        }
    });

    let audio_tx = pipeline_handle.audio_tx.clone();
    let registry = state.registry.clone();
    let heartbeat_tx = outbound_tx.clone();

    let mut receive_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.tick().await;
        // Force-disconnect once a full interval passes without a pong
        // since the last ping was sent (spec §6 "heartbeat").
        let mut awaiting_pong = false;
        loop {
            tokio::select! {
                msg = receiver.next() => {
                    // Any inbound frame counts as liveness (spec §6: a
                    // participant is disconnected only after missing an
                    // interval without *any* message, not specifically a
                    // pong) — reset before dispatching on its contents.
                    match &msg {
                        Some(Ok(WsMessage::Binary(_) | WsMessage::Text(_))) => awaiting_pong = false,
                        _ => {}
                    }
                    match msg {
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            if bytes.len() % 2 != 0 {
                                tracing::warn!(participant = %participant_id, "dropping odd-length audio frame");
                                continue;
                            }
                            registry.touch_activity(participant_id);
                            let _ = audio_tx.send(bytes.to_vec());
                        }
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<ClientMessage>(&text) {
                                Ok(ClientMessage::StreamingAudio { data }) => {
                                    if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(data) {
                                        if decoded.len() % 2 == 0 {
                                            registry.touch_activity(participant_id);
                                            let _ = audio_tx.send(decoded);
                                        } else {
                                            tracing::warn!(participant = %participant_id, "dropping odd-length audio frame");
                                        }
                                    }
                                }
                                Ok(ClientMessage::HeartbeatPong) => {
                                    registry.touch_activity(participant_id);
                                }
                                Ok(ClientMessage::JoinSession { .. }) => {}
                                Err(e) => {
                                    tracing::debug!(participant = %participant_id, "unparseable client message: {e}");
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        _ => {}
                    }
                }
                _ = ticker.tick() => {
                    if awaiting_pong {
                        tracing::info!(participant = %participant_id, "missed heartbeat, disconnecting");
                        break;
                    }
                    awaiting_pong = true;
                    let _ = heartbeat_tx.send(ServerMessage::Heartbeat);
                }
            }
        }
    });

    tokio::select! {
        _ = &mut forward_task => receive_task.abort(),
        _ = &mut receive_task => forward_task.abort(),
    }

    pipeline_handle.shutdown();

    if let Some(partner_id) = state.registry.remove_user(participant_id).await {
        if let Some(partner) = state.registry.get_participant(partner_id) {
            let _ = partner.outbound.send(ServerMessage::PartnerDisconnected);
        }
    }
}

fn send_join_response(
    outbound: &OutboundSender,
    state: &AppState,
    outcome: &JoinOutcome,
    participant_id: ParticipantId,
    role: &str,
    language: &str,
) {
    match outcome {
        JoinOutcome::Waiting { session_id, .. } => {
            let _ = outbound.send(ServerMessage::SessionJoined { session_id: *session_id });
            let _ = outbound.send(ServerMessage::WaitingForPartner);
        }
        JoinOutcome::Paired { session_id, partner_id, .. } => {
            let _ = outbound.send(ServerMessage::SessionJoined { session_id: *session_id });
            if let Some(partner) = state.registry.get_participant(*partner_id) {
                let _ = outbound.send(ServerMessage::SessionReady {
                    session_id: *session_id,
                    partner_language: partner.language.clone(),
                    partner_role: partner.role.clone(),
                });
                let _ = partner.outbound.send(ServerMessage::SessionReady {
                    session_id: *session_id,
                    partner_language: language.to_string(),
                    partner_role: role.to_string(),
                });
            }
        }
    }
}

fn to_ws(message: &ServerMessage) -> WsMessage {
    WsMessage::Text(serde_json::to_string(message).unwrap_or_default().into())
}

async fn close_with(sender: &mut SplitSink<WebSocket, WsMessage>, code: u16, reason: &str) {
    let _ = sender
        .send(WsMessage::Close(Some(CloseFrame { code, reason: reason.to_string().into() })))
        .await;
}
