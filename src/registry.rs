use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    OutboundSender, Participant, ParticipantId, Session, SessionId, SessionStatus,
};

/// A participant waiting in a role-slot queue, in enqueue order (spec §3
/// "Pairing queues").
struct WaitingEntry {
    participant_id: ParticipantId,
    enqueued_at: chrono::DateTime<Utc>,
}

/// The result of `AddUser`. A reconnecting participant reuses its prior
/// identity (see `find_reconnect_match`) but otherwise pairs exactly like
/// a fresh join — its previous session was already ended and its previous
/// partner already requeued at disconnect time (spec §4.1 "Disconnect"),
/// so there is no live session left to rejoin into.
pub enum JoinOutcome {
    /// A partner was found; the session is now Active.
    Paired {
        session_id: SessionId,
        participant_id: ParticipantId,
        partner_id: ParticipantId,
    },
    /// No partner available; the joiner is enqueued and Pending.
    Waiting {
        session_id: SessionId,
        participant_id: ParticipantId,
    },
}

/// Session + participant lifecycle and the two-role pairing queues (spec
/// §4.2). Mutating operations take a single async write lock over the
/// waiting lists; participant/session lookup is a `DashMap` (lock-striped,
/// read-biased in practice).
pub struct SessionRegistry {
    participants: DashMap<ParticipantId, Participant>,
    sessions: DashMap<SessionId, Session>,
    /// role → FIFO queue of participants waiting for a partner.
    waiting: RwLock<std::collections::HashMap<String, Vec<WaitingEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            participants: DashMap::new(),
            sessions: DashMap::new(),
            waiting: RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Add (or reconnect) a participant. Matching policy per spec §4.2:
    /// 1. reconnection check by (role, language, voiceId);
    /// 2. otherwise scan the opposite-role queue for a language mismatch;
    /// 3. otherwise enqueue into the joiner's own queue, Pending.
    pub async fn add_user(
        &self,
        role: String,
        language: String,
        voice_id: String,
        outbound: OutboundSender,
    ) -> AppResult<JoinOutcome> {
        if role.trim().is_empty() || language.trim().is_empty() || voice_id.trim().is_empty() {
            return Err(AppError::Validation(
                "role, language, and voiceId are all required".to_string(),
            ));
        }

        // 1. Reconnection check: a disconnected participant whose
        // (role, language, voiceId) triple matches reuses its identity
        // (spec §4.1, §4.2). Its previous session was already ended and
        // its previous partner already requeued at disconnect time, so
        // there is nothing left to rejoin — it falls through into the
        // same pairing scan as a fresh join, below.
        let participant_id = self
            .find_reconnect_match(&role, &language, &voice_id)
            .unwrap_or_else(Uuid::now_v7);
        let now = Utc::now();

        let mut waiting = self.waiting.write().await;
        // Scan every role bucket other than the joiner's own for the
        // earliest-enqueued waiter whose language differs (spec §3:
        // "first entry whose language differs from the joiner's";
        // ties broken by enqueue time).
        let mut best: Option<(String, usize, chrono::DateTime<Utc>)> = None;
        for (bucket_role, queue) in waiting.iter() {
            if bucket_role == &role {
                continue;
            }
            if let Some(idx) = queue.iter().position(|entry| {
                self.participants
                    .get(&entry.participant_id)
                    .map(|p| p.language != language)
                    .unwrap_or(false)
            }) {
                let enqueued_at = queue[idx].enqueued_at;
                if best.as_ref().map(|(_, _, t)| enqueued_at < *t).unwrap_or(true) {
                    best = Some((bucket_role.clone(), idx, enqueued_at));
                }
            }
        }
        let partner_entry = best.and_then(|(bucket_role, idx, _)| {
            waiting.get_mut(&bucket_role).map(|q| q.remove(idx))
        });

        if let Some(entry) = partner_entry {
            // 2. Pair with the first language-mismatched waiter.
            let partner_id = entry.participant_id;
            let session_id = Uuid::now_v7();

            self.upsert_participant(
                participant_id,
                &role,
                &language,
                &voice_id,
                outbound,
                Some(session_id),
                now,
            );

            // The partner's own Pending session (created when it first
            // joined alone, below) is now superseded by this Active one —
            // drop it, or it outlives the pairing and the reaper will
            // later delete the partner out from under a live session
            // (spec §3: a participant belongs to at most one session).
            let mut partner_old_session = None;
            if let Some(mut partner) = self.participants.get_mut(&partner_id) {
                partner_old_session = partner.session_id;
                partner.session_id = Some(session_id);
            }
            if let Some(old_id) = partner_old_session {
                self.sessions.remove(&old_id);
            }

            let mut session = Session::new_pending(session_id, partner_id);
            session.participants.push(participant_id);
            session.status = SessionStatus::Active;
            self.sessions.insert(session_id, session);

            Ok(JoinOutcome::Paired { session_id, participant_id, partner_id })
        } else {
            // 3. No match — enqueue and stay Pending. If this is a
            // reconnect, its old (Ended) session is replaced here too.
            let session_id = Uuid::now_v7();
            let old_session = self.participants.get(&participant_id).and_then(|p| p.session_id);

            self.upsert_participant(
                participant_id,
                &role,
                &language,
                &voice_id,
                outbound,
                Some(session_id),
                now,
            );
            if let Some(old_id) = old_session {
                self.sessions.remove(&old_id);
            }

            let session = Session::new_pending(session_id, participant_id);
            self.sessions.insert(session_id, session);

            waiting
                .entry(role)
                .or_default()
                .push(WaitingEntry { participant_id, enqueued_at: now });

            Ok(JoinOutcome::Waiting { session_id, participant_id })
        }
    }

    /// Insert a brand-new participant record, or refresh an existing one
    /// (reconnect) in place — swapping in the new transport handle and
    /// clearing `disconnected_at` either way.
    fn upsert_participant(
        &self,
        participant_id: ParticipantId,
        role: &str,
        language: &str,
        voice_id: &str,
        outbound: OutboundSender,
        session_id: Option<SessionId>,
        now: chrono::DateTime<Utc>,
    ) {
        if let Some(mut existing) = self.participants.get_mut(&participant_id) {
            existing.outbound = outbound;
            existing.last_activity = now;
            existing.disconnected_at = None;
            existing.session_id = session_id;
        } else {
            self.participants.insert(
                participant_id,
                Participant {
                    id: participant_id,
                    session_id,
                    role: role.to_string(),
                    language: language.to_string(),
                    voice_id: voice_id.to_string(),
                    outbound,
                    joined_at: now,
                    last_activity: now,
                    disconnected_at: None,
                },
            );
        }
    }

    fn find_reconnect_match(&self, role: &str, language: &str, voice_id: &str) -> Option<ParticipantId> {
        self.participants.iter().find_map(|entry| {
            let p = entry.value();
            if p.disconnected_at.is_some()
                && p.role == role
                && p.language == language
                && p.voice_id == voice_id
            {
                Some(p.id)
            } else {
                None
            }
        })
    }

    /// Remove a participant on disconnect. The participant record itself
    /// is kept (marked `disconnected_at`) until the reconnect window
    /// elapses — see `reap` — so a same-triple rejoin can still swap the
    /// transport handle in place. If the participant was in an Active
    /// session, the partner is notified by the caller and moved back into
    /// its own waiting queue as Pending; the session transitions to Ended
    /// immediately (spec §4.1 "Disconnect", §4.2).
    pub async fn remove_user(&self, participant_id: ParticipantId) -> Option<ParticipantId> {
        let session_id = {
            let mut p = self.participants.get_mut(&participant_id)?;
            p.disconnected_at = Some(Utc::now());
            p.session_id?
        };

        let mut requeue_partner = None;
        if let Some(mut session) = self.sessions.get_mut(&session_id) {
            if session.status == SessionStatus::Active {
                if let Some(partner_id) = session.partner_of(participant_id) {
                    requeue_partner = Some(partner_id);
                }
            }
            session.status = SessionStatus::Ended;
            session.ended_at = Some(Utc::now());
        }

        if let Some(partner_id) = requeue_partner {
            if let Some(mut partner) = self.participants.get_mut(&partner_id) {
                let new_session_id = Uuid::now_v7();
                partner.session_id = Some(new_session_id);
                let role = partner.role.clone();
                let now = Utc::now();
                drop(partner);

                let session = Session::new_pending(new_session_id, partner_id);
                self.sessions.insert(new_session_id, session);

                let mut waiting = self.waiting.write().await;
                waiting
                    .entry(role)
                    .or_default()
                    .push(WaitingEntry { participant_id: partner_id, enqueued_at: now });
            }
        }

        requeue_partner
    }

    /// Access a session by id without cloning its non-`Clone` internals.
    pub fn with_session<T>(&self, session_id: SessionId, f: impl FnOnce(&Session) -> T) -> Option<T> {
        self.sessions.get(&session_id).map(|s| f(&s))
    }

    pub fn with_session_mut<T>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&mut Session) -> T,
    ) -> Option<T> {
        self.sessions.get_mut(&session_id).map(|mut s| f(&mut s))
    }

    pub fn get_participant(&self, participant_id: ParticipantId) -> Option<Participant> {
        self.participants.get(&participant_id).map(|p| p.clone())
    }

    pub fn touch_activity(&self, participant_id: ParticipantId) {
        if let Some(mut p) = self.participants.get_mut(&participant_id) {
            p.last_activity = Utc::now();
        }
    }

    /// Find the partner of a participant, if any, through the session.
    pub fn find_partner(&self, participant_id: ParticipantId) -> Option<ParticipantId> {
        let session_id = self.participants.get(&participant_id)?.session_id?;
        self.sessions.get(&session_id)?.partner_of(participant_id)
    }

    /// Reap idle Active sessions, expired Pending sessions, Ended sessions
    /// past their grace window, and disconnected participants whose
    /// reconnect window has elapsed (spec §4.2, §5).
    pub async fn reap(
        &self,
        session_idle: chrono::Duration,
        pending_max_age: chrono::Duration,
        ended_grace: chrono::Duration,
        reconnect_window: chrono::Duration,
    ) -> Vec<ParticipantId> {
        let now = Utc::now();
        let mut disconnected = Vec::new();
        let mut ended_ids = Vec::new();
        let mut pending_ids = Vec::new();

        for entry in self.sessions.iter() {
            let session = entry.value();
            match session.status {
                SessionStatus::Active => {
                    let all_idle = session.participants.iter().all(|id| {
                        self.participants
                            .get(id)
                            .map(|p| now - p.last_activity > session_idle)
                            .unwrap_or(true)
                    });
                    if all_idle {
                        disconnected.extend(session.participants.iter().copied());
                    }
                }
                SessionStatus::Pending => {
                    if now - session.created_at > pending_max_age {
                        pending_ids.push(session.id);
                    }
                }
                SessionStatus::Ended => {
                    if let Some(ended_at) = session.ended_at {
                        if now - ended_at > ended_grace {
                            ended_ids.push(session.id);
                        }
                    }
                }
            }
        }

        for id in ended_ids {
            self.sessions.remove(&id);
        }
        for id in pending_ids {
            if let Some((_, session)) = self.sessions.remove(&id) {
                for pid in session.participants {
                    self.participants.remove(&pid);
                }
            }
        }

        let expired_participants: Vec<ParticipantId> = self
            .participants
            .iter()
            .filter_map(|entry| {
                let p = entry.value();
                match p.disconnected_at {
                    Some(at) if now - at > reconnect_window => Some(p.id),
                    _ => None,
                }
            })
            .collect();
        for pid in expired_participants {
            self.participants.remove(&pid);
        }

        disconnected
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn sender() -> OutboundSender {
        let (tx, _rx) = mpsc::unbounded_channel();
        tx
    }

    #[tokio::test]
    async fn s1_pairing_waits_then_pairs() {
        let registry = SessionRegistry::new();

        let outcome_a = registry
            .add_user("doctor".into(), "tr".into(), "v_tr".into(), sender())
            .await
            .unwrap();
        assert!(matches!(outcome_a, JoinOutcome::Waiting { .. }));

        let outcome_b = registry
            .add_user("patient".into(), "en".into(), "v_en".into(), sender())
            .await
            .unwrap();
        assert!(matches!(outcome_b, JoinOutcome::Paired { .. }));
    }

    #[tokio::test]
    async fn s2_same_language_does_not_pair() {
        let registry = SessionRegistry::new();
        registry
            .add_user("doctor".into(), "tr".into(), "v_tr".into(), sender())
            .await
            .unwrap();

        let outcome_c = registry
            .add_user("patient".into(), "tr".into(), "v_tr2".into(), sender())
            .await
            .unwrap();
        assert!(matches!(outcome_c, JoinOutcome::Waiting { .. }));
    }

    #[tokio::test]
    async fn remove_user_requeues_partner() {
        let registry = SessionRegistry::new();
        let outcome_a = registry
            .add_user("doctor".into(), "tr".into(), "v_tr".into(), sender())
            .await
            .unwrap();
        let JoinOutcome::Waiting { session_id: sid_a, .. } = outcome_a else {
            panic!("expected waiting")
        };
        let participant_a = registry
            .with_session(sid_a, |s| s.participants[0])
            .unwrap();

        let outcome_b = registry
            .add_user("patient".into(), "en".into(), "v_en".into(), sender())
            .await
            .unwrap();
        assert!(matches!(outcome_b, JoinOutcome::Paired { .. }));

        let partner_requeued = registry.remove_user(participant_a).await;
        assert!(partner_requeued.is_some());

        let partner_id = partner_requeued.unwrap();
        let partner = registry.get_participant(partner_id).unwrap();
        let new_session = partner.session_id.unwrap();
        let status = registry.with_session(new_session, |s| s.status).unwrap();
        assert_eq!(status, SessionStatus::Pending);
    }
}
