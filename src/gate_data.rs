/// Static, per-language data consumed by the utterance gate (spec §4.4).
/// The gate never learns vocabulary at runtime — all of this is loaded at
/// construction time from these tables.

/// Interrogative words used for question detection (spec §4.4's "begins
/// with an interrogative word").
pub fn interrogative_words(language: &str) -> &'static [&'static str] {
    match language {
        "tr" => &["ne", "neden", "nasıl", "kim", "nerede", "ne zaman", "hangi", "kaç"],
        "es" => &["qué", "quién", "cómo", "dónde", "cuándo", "cuál", "por qué"],
        "de" => &["was", "wer", "wie", "wo", "wann", "warum", "welche"],
        "fr" => &["que", "qui", "comment", "où", "quand", "pourquoi", "quel"],
        _ => &["what", "who", "how", "where", "when", "why", "which", "can", "could", "would", "do", "does", "is", "are"],
    }
}

/// Verb-word lists (analytic languages) used by the grammar heuristic's
/// subject+verb check.
pub fn verb_words(language: &str) -> &'static [&'static str] {
    match language {
        "es" => &["es", "está", "son", "están", "tiene", "tengo", "quiero", "necesito", "puedo", "hay"],
        "de" => &["ist", "sind", "habe", "hat", "haben", "bin", "kann", "möchte", "brauche"],
        "fr" => &["est", "sont", "ai", "avez", "suis", "peux", "veux", "voudrais"],
        _ => &["is", "are", "was", "were", "have", "has", "had", "do", "does", "did", "need", "want", "can", "will", "would", "should"],
    }
}

/// Verb-ending suffixes for agglutinative languages (spec §4.4: "verb-
/// ending patterns for agglutinative languages").
pub fn agglutinative_verb_suffixes(language: &str) -> &'static [&'static str] {
    match language {
        "tr" => &["yor", "dı", "di", "du", "dü", "tı", "ti", "tu", "tü", "ecek", "acak", "miş", "muş", "ır", "ir", "ur", "ür"],
        "ja" => &["ます", "ました", "です", "でした", "る", "た"],
        "ko" => &["니다", "어요", "아요", "습니다"],
        _ => &[],
    }
}

pub fn is_agglutinative(language: &str) -> bool {
    matches!(language, "tr" | "ja" | "ko" | "fi" | "hu")
}

/// Configurable domain-term keyword list (spec §4.4 "domain-term keyword").
/// Defaults to a medical/professional-conversation wordlist since the
/// sample scenarios in spec §8 use doctor/patient roles.
pub fn domain_keywords(language: &str) -> &'static [&'static str] {
    match language {
        "tr" => &["ağrı", "ateş", "ilaç", "doktor", "hastane", "semptom", "tedavi"],
        "es" => &["dolor", "fiebre", "medicina", "doctor", "hospital", "síntoma", "tratamiento"],
        _ => &["pain", "fever", "medication", "doctor", "hospital", "symptom", "treatment", "dose", "allergy", "diagnosis"],
    }
}

/// Urgency keyword list (spec §4.4 "urgency keyword").
pub fn urgency_keywords(language: &str) -> &'static [&'static str] {
    match language {
        "tr" => &["yardım", "acil", "imdat", "ambulans", "nefes alamıyorum"],
        "es" => &["ayuda", "emergencia", "socorro", "ambulancia", "urgente"],
        _ => &["help", "emergency", "urgent", "ambulance", "can't breathe", "chest pain", "bleeding"],
    }
}

/// Topic-start markers (spec §4.4 "topic-start marker").
pub fn topic_start_markers(language: &str) -> &'static [&'static str] {
    match language {
        "tr" => &["şimdi", "peki", "aslında", "bir de"],
        "es" => &["bueno", "entonces", "por cierto", "ahora"],
        _ => &["so", "now", "actually", "by the way", "well", "also"],
    }
}
