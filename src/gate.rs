/// The utterance gate — the professional-conversation processor (spec
/// §4.4). Converts a noisy partial-transcript stream into discrete,
/// translation-worthy `Utterance`s.
///
/// This module is pure decision logic: scoring and the state machine are
/// synchronous and deterministic so they can be unit tested without a
/// runtime. The actual timer (tokio::time::sleep) is driven by the
/// caller (`pipeline.rs`), which owns the gate exclusively per
/// participant and reacts to `GateDecision::ScheduleTimer` /
/// `GateDecision::CancelTimer`.
use chrono::{DateTime, Utc};

use crate::config::GateConfig;
use crate::gate_data;
use crate::models::{ConversationProfile, Utterance};
use crate::text::{normalize, word_count};

#[derive(Debug, Clone)]
struct PendingCandidate {
    text: String,
    confidence: f64,
    is_final: bool,
    started_at: DateTime<Utc>,
    /// Bumped every time the pending candidate changes; a timer fired
    /// with a stale token is ignored (arrival of a new candidate cancels
    /// any pending timer — spec §4.4).
    token: u64,
}

/// What the caller should do after `consider()`.
#[derive(Debug)]
pub enum GateDecision {
    /// Drop silently — deduplicated against the last-processed utterance.
    Dropped,
    /// Fire immediately with this utterance.
    Fire(Utterance),
    /// (Re)schedule a single-shot timer. Any previously scheduled timer
    /// for this participant must be cancelled — the token identifies
    /// which pending candidate it belongs to.
    ScheduleTimer { after_ms: u64, token: u64 },
    /// Accumulated into the pending candidate; nothing else to do yet.
    Continue,
}

/// Per-participant utterance gate. Owned exclusively by that
/// participant's pipeline task.
pub struct UtteranceGate {
    language: String,
    role: String,
    config: GateConfig,
    profile: ConversationProfile,
    pending: Option<PendingCandidate>,
    last_fired_text: Option<String>,
    next_token: u64,
}

impl UtteranceGate {
    pub fn new(language: String, role: String, config: GateConfig) -> Self {
        Self {
            language,
            role,
            config,
            profile: ConversationProfile::new(),
            pending: None,
            last_fired_text: None,
            next_token: 1,
        }
    }

    pub fn profile(&self) -> &ConversationProfile {
        &self.profile
    }

    /// Feed a new partial or final transcript into the gate.
    pub fn consider(&mut self, text: &str, confidence: f64, is_final: bool, participant_id: uuid::Uuid) -> GateDecision {
        let now = Utc::now();

        // 1. Dedup check against the last *processed* (fired) utterance.
        let normalized = normalize(text);
        if let Some(last) = &self.profile.last_normalized {
            if *last == normalized {
                if let Some(last_at) = self.profile.last_processed_at {
                    if (now - last_at).num_milliseconds() < self.config.dedup_window_secs as i64 * 1000 {
                        return GateDecision::Dropped;
                    }
                }
            }
        }

        // Merge into the pending candidate, keeping the longer text
        // (spec §4.4: "keep the longer of the current pending candidate
        // and the new text").
        let merged_text = match &self.pending {
            Some(p) if p.text.len() >= text.len() && !text.is_empty() => p.text.clone(),
            _ => text.to_string(),
        };

        self.next_token += 1;
        let token = self.next_token;
        let started_at = self.pending.as_ref().map(|p| p.started_at).unwrap_or(now);
        self.pending = Some(PendingCandidate {
            text: merged_text.clone(),
            confidence,
            is_final,
            started_at,
            token,
        });

        let words = word_count(&merged_text);
        let score = self.score(&merged_text, confidence, is_final);
        // Push into the score window regardless of outcome — adaptive
        // learning only happens on firing (below), this just tracks shape
        // for future scoring inputs is not required here since avg uses
        // firing-time updates only, per spec §4.4 "Adaptive learning on
        // firing".

        let has_urgency = contains_any(&merged_text, gate_data::urgency_keywords(&self.language));
        let has_domain = contains_any(&merged_text, gate_data::domain_keywords(&self.language));
        let is_question = is_question(&merged_text, &self.language);

        // 2. Immediate firing conditions. Confidence and word-count
        // thresholds are the configurable `minConfidenceThreshold` /
        // `minWordsForProcessing` knobs (spec §6); the 0.6 score
        // thresholds for questions/domain terms are fixed scoring-table
        // constants from §4.4, not separately configurable.
        let min_confidence = self.config.min_confidence_threshold;
        let min_words = self.config.min_words_for_processing;
        let immediate = has_urgency
            || (score >= 0.8 && confidence >= min_confidence)
            || (is_question && score >= 0.6)
            || (is_final && words >= min_words && confidence >= min_confidence)
            || (has_domain && score >= 0.6);

        if immediate {
            return GateDecision::Fire(self.fire(merged_text, confidence, score, now, participant_id));
        }

        // 3. Short-message timer: 1-2 words.
        if (1..=2).contains(&words) {
            return GateDecision::ScheduleTimer {
                after_ms: self.config.short_message_timeout_ms,
                token,
            };
        }

        // 4. Normal timer: substantial length and score >= 0.4.
        if words >= 3 && score >= 0.4 {
            let duration_ms = self.normal_timer_duration_ms(score);
            return GateDecision::ScheduleTimer { after_ms: duration_ms, token };
        }

        // 5. Otherwise accumulate — nothing fires yet.
        GateDecision::Continue
    }

    /// Called by the caller's timer when a previously scheduled timer
    /// expires. Returns `Some` only if the token still matches the
    /// current pending candidate (i.e. no newer candidate superseded it).
    pub fn timer_fired(&mut self, token: u64, participant_id: uuid::Uuid) -> Option<Utterance> {
        let pending = self.pending.as_ref()?;
        if pending.token != token {
            return None;
        }
        let text = pending.text.clone();
        let confidence = pending.confidence;
        let score = self.score(&text, confidence, pending.is_final);
        let now = Utc::now();
        Some(self.fire(text, confidence, score, now, participant_id))
    }

    fn fire(
        &mut self,
        text: String,
        confidence: f64,
        score: f64,
        now: DateTime<Utc>,
        participant_id: uuid::Uuid,
    ) -> Utterance {
        let words = word_count(&text) as f64;
        let started_at = self.pending.as_ref().map(|p| p.started_at).unwrap_or(now);

        // Adaptive learning (spec §4.4): update running averages, bounded
        // confidence/score windows, and the utterance counter.
        let prev_avg_len = self.profile.avg_sentence_len;
        let new_avg_len = prev_avg_len + 0.15 * (words - prev_avg_len);
        // A single utterance changes the running average by at most 15%
        // of its own word count (testable property §8.7).
        let max_delta = 0.15 * words.max(1.0);
        self.profile.avg_sentence_len = new_avg_len
            .clamp(prev_avg_len - max_delta, prev_avg_len + max_delta)
            .clamp(1.0, 200.0);

        let elapsed_ms = (now - started_at).num_milliseconds().max(0) as f64;
        self.profile.avg_pause_ms += 0.2 * (elapsed_ms - self.profile.avg_pause_ms);

        push_bounded(&mut self.profile.confidence_window, confidence, ConversationProfile::CONFIDENCE_WINDOW_CAP);
        push_bounded(&mut self.profile.score_window, score, ConversationProfile::SCORE_WINDOW_CAP);
        self.profile.total_utterances += 1;

        let normalized = normalize(&text);
        self.profile.last_normalized = Some(normalized);
        self.profile.last_processed_at = Some(now);
        self.last_fired_text = Some(text.clone());
        self.pending = None;

        Utterance {
            text,
            source_language: self.language.clone(),
            confidence,
            completion_score: score,
            started_at,
            timestamp: now,
            participant_id,
        }
    }

    fn normal_timer_duration_ms(&self, score: f64) -> u64 {
        let base_ms = self.profile.avg_pause_ms.max(1.0);
        let mut factor = 1.0;
        if score >= 0.6 {
            factor *= 0.6;
        } else if score <= 0.3 {
            factor *= 1.4;
        }
        if self.role.eq_ignore_ascii_case("doctor") || self.role.eq_ignore_ascii_case("formal") {
            factor *= 1.1;
        }
        if contains_any(self.last_fired_text.as_deref().unwrap_or(""), gate_data::domain_keywords(&self.language)) {
            factor *= 1.2;
        }
        ((base_ms * factor) as u64).clamp(500, self.config.emergency_timeout_ms)
    }

    fn score(&self, text: &str, confidence: f64, is_final: bool) -> f64 {
        let _ = is_final;
        let mut s = 0.0_f64;
        let trimmed = text.trim();
        let words = word_count(trimmed);
        let ends_with = |c: char| trimmed.ends_with(c);

        if ends_with('.') || ends_with('!') || ends_with('?') {
            s += 0.35;
        }

        let question = is_question(trimmed, &self.language);
        if question {
            s += match words {
                0 | 1 => 0.1,
                2 => 0.2,
                _ => 0.4,
            };
        }
        if ends_with('.') && !question {
            s += 0.3;
        }
        if trimmed.contains('!') {
            s += 0.25;
        }
        if has_complete_grammar(trimmed, &self.language) {
            s += 0.25;
        }

        let punctuated = ends_with('.') || ends_with('!') || ends_with('?');
        let avg_len = self.profile.avg_sentence_len.max(1.0);
        if words >= 3 && (punctuated || words as f64 >= 0.8 * avg_len) {
            s += 0.3;
        }
        if words >= 3 {
            s += 0.15;
        }
        if confidence >= 0.8 {
            s += 0.1;
        }

        let ratio = words as f64 / avg_len;
        if ratio >= 0.8 {
            s += 0.1;
            if ratio >= 1.2 {
                s += 0.05;
            }
        }

        if contains_any(trimmed, gate_data::domain_keywords(&self.language)) {
            s += 0.1;
        }
        if contains_any(trimmed, gate_data::urgency_keywords(&self.language)) {
            s += 0.15;
        }

        if starts_with_any(trimmed, gate_data::topic_start_markers(&self.language)) {
            s += 0.1;
        }
        if let Some(prev) = &self.last_fired_text {
            if !prev.is_empty() && trimmed.to_lowercase().starts_with(&prev.to_lowercase()) && trimmed.len() > prev.len() {
                s -= 0.1;
            }
        }

        s.clamp(0.0, 1.0)
    }
}

fn push_bounded(window: &mut std::collections::VecDeque<f64>, value: f64, cap: usize) {
    window.push_back(value);
    while window.len() > cap {
        window.pop_front();
    }
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    let lower = text.to_lowercase();
    words.iter().any(|w| lower.contains(&w.to_lowercase()))
}

fn starts_with_any(text: &str, words: &[&str]) -> bool {
    let lower = text.trim().to_lowercase();
    words.iter().any(|w| lower.starts_with(&w.to_lowercase()))
}

fn is_question(text: &str, language: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.ends_with('?') {
        return true;
    }
    let first_word = trimmed.split_whitespace().next().unwrap_or("").to_lowercase();
    gate_data::interrogative_words(language)
        .iter()
        .any(|w| first_word == w.to_lowercase())
}

fn has_complete_grammar(text: &str, language: &str) -> bool {
    let lower = text.to_lowercase();
    if gate_data::is_agglutinative(language) {
        let suffixes = gate_data::agglutinative_verb_suffixes(language);
        lower
            .split_whitespace()
            .any(|w| suffixes.iter().any(|suf| w.ends_with(suf)))
    } else {
        let verbs = gate_data::verb_words(language);
        lower.split_whitespace().any(|w| verbs.contains(&w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> GateConfig {
        GateConfig {
            min_confidence_threshold: 0.8,
            min_words_for_processing: 3,
            min_characters_for_processing: 15,
            short_message_timeout_ms: 3000,
            conversational_pause_threshold_ms: 750,
            sentence_completion_threshold_ms: 1200,
            thought_completion_threshold_ms: 2000,
            emergency_timeout_ms: 4000,
            dedup_window_secs: 3,
        }
    }

    #[test]
    fn s6_urgency_fires_immediately() {
        let mut gate = UtteranceGate::new("en".into(), "patient".into(), cfg());
        let decision = gate.consider("help", 0.6, false, uuid::Uuid::nil());
        assert!(matches!(decision, GateDecision::Fire(_)));
    }

    #[test]
    fn s5_short_message_schedules_timer() {
        let mut gate = UtteranceGate::new("en".into(), "patient".into(), cfg());
        let decision = gate.consider("ok", 0.7, false, uuid::Uuid::nil());
        match decision {
            GateDecision::ScheduleTimer { after_ms, .. } => assert_eq!(after_ms, 3000),
            other => panic!("expected ScheduleTimer, got {other:?}"),
        }
    }

    #[test]
    fn s3_final_with_high_confidence_fires() {
        let mut gate = UtteranceGate::new("en".into(), "patient".into(), cfg());
        let decision = gate.consider("hello, how are you", 0.92, true, uuid::Uuid::nil());
        assert!(matches!(decision, GateDecision::Fire(_)));
    }

    #[test]
    fn s4_dedup_drops_within_window() {
        let mut gate = UtteranceGate::new("en".into(), "patient".into(), cfg());
        let first = gate.consider("thank you very much", 0.9, true, uuid::Uuid::nil());
        assert!(matches!(first, GateDecision::Fire(_)));
        let second = gate.consider("thank you very much", 0.9, true, uuid::Uuid::nil());
        assert!(matches!(second, GateDecision::Dropped));
    }

    #[test]
    fn timer_fired_ignores_stale_token() {
        let mut gate = UtteranceGate::new("en".into(), "patient".into(), cfg());
        let decision = gate.consider("ok", 0.5, false, uuid::Uuid::nil());
        let GateDecision::ScheduleTimer { token, .. } = decision else {
            panic!("expected timer")
        };
        // A newer candidate arrives before the timer fires.
        let _ = gate.consider("okay then", 0.5, false, uuid::Uuid::nil());
        assert!(gate.timer_fired(token, uuid::Uuid::nil()).is_none());
    }

    #[test]
    fn avg_sentence_length_bounded() {
        let mut gate = UtteranceGate::new("en".into(), "patient".into(), cfg());
        for _ in 0..50 {
            gate.consider("help", 0.9, false, uuid::Uuid::nil());
        }
        assert!(gate.profile().avg_sentence_len >= 1.0);
        assert!(gate.profile().avg_sentence_len <= 200.0);
    }
}
