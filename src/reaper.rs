/// Background sweep (spec §5). A single ticker drives five independent
/// cleanup duties; none of them talk to the provider clients or the
/// registry except through their own public sweep methods. Grounded on
/// this codebase's presence-cleanup loop — same cadence-driven shape,
/// generalized over more than one kind of state.
use std::sync::Arc;

use chrono::Duration as ChronoDuration;

use crate::asr::AsrClient;
use crate::config::ReaperConfig;
use crate::models::ServerMessage;
use crate::registry::SessionRegistry;
use crate::tts::TtsClient;

pub struct Reaper {
    registry: Arc<SessionRegistry>,
    asr: Arc<AsrClient>,
    tts: Arc<TtsClient>,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(registry: Arc<SessionRegistry>, asr: Arc<AsrClient>, tts: Arc<TtsClient>, config: ReaperConfig) -> Self {
        Self { registry, asr, tts, config }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(self.config.cadence_secs));
        loop {
            ticker.tick().await;
            self.sweep().await;
        }
    }

    async fn sweep(&self) {
        self.asr.sweep_idle(ChronoDuration::seconds(self.config.asr_idle_secs as i64));
        self.tts.sweep_expired();

        let disconnected = self
            .registry
            .reap(
                ChronoDuration::seconds(self.config.session_idle_secs as i64),
                ChronoDuration::seconds(self.config.pending_session_max_secs as i64),
                ChronoDuration::seconds(self.config.ended_session_grace_secs as i64),
                ChronoDuration::seconds(self.config.reconnect_window_secs as i64),
            )
            .await;

        for participant_id in disconnected {
            if let Some(participant) = self.registry.get_participant(participant_id) {
                let _ = participant.outbound.send(ServerMessage::PartnerDisconnected);
            }
            self.registry.remove_user(participant_id).await;
        }
    }
}
