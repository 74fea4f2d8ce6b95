/// Emotion analyzer (spec §4.8) — pure computation over a rolling audio
/// buffer and the utterance text. No I/O, no provider calls; any failure
/// here degrades to `EmotionalProfile::neutral_default()` rather than
/// propagating an error, since a missing emotional read is never fatal
/// to the pipeline.
use crate::gate_data;
use crate::models::{Emotion, EmotionalProfile, VoiceSettings};

/// Coarse acoustic features extracted from a ≤5s rolling PCM buffer.
#[derive(Debug, Clone, Copy, Default)]
struct AudioFeatures {
    pitch_variance: f64,
    energy: f64,
    zero_crossing_rate: f64,
    envelope_peak: f64,
    tempo_wpm: f64,
}

/// 16kHz mono 16-bit PCM: 2 bytes/sample, 32000 bytes/sec.
const SAMPLE_RATE: usize = 16_000;
const BYTES_PER_SAMPLE: usize = 2;

fn extract_features(pcm: &[u8], word_count: usize) -> AudioFeatures {
    if pcm.len() < BYTES_PER_SAMPLE * 2 {
        return AudioFeatures::default();
    }

    let samples: Vec<i16> = pcm
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();

    let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len() as f64;
    let variance = samples.iter().map(|&s| (s as f64 - mean).powi(2)).sum::<f64>() / samples.len() as f64;

    let energy = (samples.iter().map(|&s| (s as f64).powi(2)).sum::<f64>() / samples.len() as f64).sqrt();

    let mut crossings = 0usize;
    for w in samples.windows(2) {
        if (w[0] >= 0) != (w[1] >= 0) {
            crossings += 1;
        }
    }
    let zero_crossing_rate = crossings as f64 / samples.len() as f64;

    let peak = samples.iter().map(|&s| (s as f64).abs()).fold(0.0, f64::max);

    let duration_secs = samples.len() as f64 / SAMPLE_RATE as f64;
    let tempo_wpm = if duration_secs > 0.0 { (word_count as f64 / duration_secs) * 60.0 } else { 0.0 };

    AudioFeatures {
        pitch_variance: variance.sqrt(),
        energy,
        zero_crossing_rate,
        envelope_peak: peak,
        tempo_wpm,
    }
}

/// Per-emotion scores in [0, 1], keyed by `Emotion` variant order.
struct EmotionScores {
    scores: [(Emotion, f64); 10],
}

impl EmotionScores {
    fn zeroed() -> Self {
        Self {
            scores: [
                (Emotion::Happy, 0.0),
                (Emotion::Sad, 0.0),
                (Emotion::Angry, 0.0),
                (Emotion::Surprised, 0.0),
                (Emotion::Sarcastic, 0.0),
                (Emotion::Excited, 0.0),
                (Emotion::Calm, 0.0),
                (Emotion::Urgent, 0.0),
                (Emotion::Confident, 0.0),
                (Emotion::Nervous, 0.0),
            ],
        }
    }

    fn add(&mut self, emotion: Emotion, weight: f64) {
        if let Some(entry) = self.scores.iter_mut().find(|(e, _)| *e == emotion) {
            entry.1 += weight;
        }
    }

    fn argmax(&self) -> (Emotion, f64) {
        self.scores
            .iter()
            .copied()
            .fold((Emotion::Calm, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best })
    }

    fn total(&self) -> f64 {
        self.scores.iter().map(|(_, s)| s).sum()
    }
}

fn score_from_acoustics(features: &AudioFeatures) -> EmotionScores {
    let mut scores = EmotionScores::zeroed();

    // High energy + high pitch variance reads as excited/angry/surprised
    // depending on tempo; low energy + low variance reads as calm/sad.
    let energy_norm = (features.energy / 8000.0).clamp(0.0, 1.0);
    let pitch_norm = (features.pitch_variance / 4000.0).clamp(0.0, 1.0);
    let tempo_norm = (features.tempo_wpm / 220.0).clamp(0.0, 1.0);
    let zcr_norm = (features.zero_crossing_rate / 0.3).clamp(0.0, 1.0);

    scores.add(Emotion::Excited, energy_norm * 0.5 + tempo_norm * 0.5);
    scores.add(Emotion::Angry, energy_norm * 0.6 + zcr_norm * 0.4);
    scores.add(Emotion::Surprised, pitch_norm * 0.7 + tempo_norm * 0.3);
    scores.add(Emotion::Happy, pitch_norm * 0.4 + energy_norm * 0.3 + tempo_norm * 0.3);
    scores.add(Emotion::Calm, (1.0 - energy_norm) * 0.6 + (1.0 - pitch_norm) * 0.4);
    scores.add(Emotion::Sad, (1.0 - energy_norm) * 0.5 + (1.0 - tempo_norm) * 0.5);
    scores.add(Emotion::Nervous, zcr_norm * 0.5 + pitch_norm * 0.5);
    scores.add(Emotion::Urgent, tempo_norm * 0.6 + energy_norm * 0.4);
    scores.add(Emotion::Confident, energy_norm * 0.4 + (1.0 - zcr_norm) * 0.6);

    scores
}

fn score_from_keywords(text: &str, language: &str) -> EmotionScores {
    let mut scores = EmotionScores::zeroed();
    let lower = text.to_lowercase();

    if gate_data::urgency_keywords(language).iter().any(|kw| lower.contains(kw)) {
        scores.add(Emotion::Urgent, 1.0);
    }
    if gate_data::domain_keywords(language).iter().any(|kw| lower.contains(kw)) {
        scores.add(Emotion::Confident, 0.2);
    }

    const HAPPY: &[&str] = &["great", "wonderful", "happy", "glad", "excellent", "love"];
    const SAD: &[&str] = &["sad", "sorry", "unfortunately", "upset", "terrible"];
    const ANGRY: &[&str] = &["angry", "furious", "unacceptable", "ridiculous"];

    if HAPPY.iter().any(|kw| lower.contains(kw)) {
        scores.add(Emotion::Happy, 0.6);
    }
    if SAD.iter().any(|kw| lower.contains(kw)) {
        scores.add(Emotion::Sad, 0.6);
    }
    if ANGRY.iter().any(|kw| lower.contains(kw)) {
        scores.add(Emotion::Angry, 0.6);
    }
    if text.trim_end().ends_with('!') {
        scores.add(Emotion::Excited, 0.3);
    }

    scores
}

fn voice_settings_for(emotion: Emotion, intensity: f64) -> VoiceSettings {
    let base = match emotion {
        Emotion::Happy => VoiceSettings { stability: 0.4, similarity_boost: 0.8, style: 0.6, use_speaker_boost: true },
        Emotion::Sad => VoiceSettings { stability: 0.7, similarity_boost: 0.6, style: 0.2, use_speaker_boost: false },
        Emotion::Angry => VoiceSettings { stability: 0.3, similarity_boost: 0.85, style: 0.8, use_speaker_boost: true },
        Emotion::Surprised => VoiceSettings { stability: 0.35, similarity_boost: 0.7, style: 0.65, use_speaker_boost: true },
        Emotion::Sarcastic => VoiceSettings { stability: 0.5, similarity_boost: 0.65, style: 0.5, use_speaker_boost: true },
        Emotion::Excited => VoiceSettings { stability: 0.3, similarity_boost: 0.8, style: 0.75, use_speaker_boost: true },
        Emotion::Calm => VoiceSettings::neutral(),
        Emotion::Urgent => VoiceSettings { stability: 0.25, similarity_boost: 0.8, style: 0.7, use_speaker_boost: true },
        Emotion::Confident => VoiceSettings { stability: 0.6, similarity_boost: 0.8, style: 0.4, use_speaker_boost: true },
        Emotion::Nervous => VoiceSettings { stability: 0.45, similarity_boost: 0.6, style: 0.45, use_speaker_boost: false },
    };

    // Scale style toward the base value by intensity; a low-intensity read
    // stays close to neutral even for a strongly-matched emotion label.
    let neutral = VoiceSettings::neutral();
    VoiceSettings {
        stability: neutral.stability + (base.stability - neutral.stability) * intensity,
        similarity_boost: neutral.similarity_boost + (base.similarity_boost - neutral.similarity_boost) * intensity,
        style: neutral.style + (base.style - neutral.style) * intensity,
        use_speaker_boost: base.use_speaker_boost,
    }
    .clamped()
}

/// Analyze a rolling audio buffer plus the utterance text, producing a
/// best-effort emotional profile. Degrades to neutral on any unusable
/// input (spec §4.8 "failure always degrades to neutral, never blocks
/// the pipeline").
pub fn analyze(pcm: &[u8], text: &str, language: &str) -> EmotionalProfile {
    let word_count = crate::text::word_count(text);
    let features = extract_features(pcm, word_count);

    let mut scores = score_from_acoustics(&features);
    let keyword_scores = score_from_keywords(text, language);
    for (emotion, weight) in keyword_scores.scores {
        scores.add(emotion, weight);
    }

    let total = scores.total();
    if total <= 0.0 {
        return EmotionalProfile::neutral_default();
    }

    let (primary, raw_score) = scores.argmax();
    let intensity = (raw_score / total.max(1.0)).clamp(0.0, 1.0);
    let confidence = (total / 3.0).clamp(0.0, 1.0);

    let tonality = match primary {
        Emotion::Happy | Emotion::Excited | Emotion::Confident => "upbeat",
        Emotion::Sad | Emotion::Nervous => "subdued",
        Emotion::Angry | Emotion::Urgent => "sharp",
        Emotion::Surprised => "lifted",
        Emotion::Sarcastic => "dry",
        Emotion::Calm => "neutral",
    }
    .to_string();

    EmotionalProfile {
        primary_emotion: primary,
        intensity,
        confidence,
        tonality,
        voice_settings: voice_settings_for(primary, intensity),
        cultural_context: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silence(len_samples: usize) -> Vec<u8> {
        vec![0u8; len_samples * BYTES_PER_SAMPLE]
    }

    #[test]
    fn degrades_to_neutral_on_empty_buffer() {
        let profile = analyze(&[], "", "en");
        assert_eq!(profile.primary_emotion, Emotion::Calm);
        assert_eq!(profile.confidence, 0.0);
    }

    #[test]
    fn urgency_keyword_drives_urgent_emotion() {
        let profile = analyze(&silence(8000), "help, emergency, I can't breathe", "en");
        assert_eq!(profile.primary_emotion, Emotion::Urgent);
    }

    #[test]
    fn voice_settings_stay_within_bounds() {
        let profile = analyze(&silence(8000), "this is unacceptable and ridiculous", "en");
        assert!(profile.voice_settings.stability >= 0.0 && profile.voice_settings.stability <= 1.0);
        assert!(profile.voice_settings.style >= 0.0 && profile.voice_settings.style <= 1.0);
    }
}
