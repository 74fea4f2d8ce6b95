/// Text normalization shared by the utterance gate's dedup check and the
/// TTS synthesis cache key (spec §3 "Normalized text").

/// Trim, lower-case, and strip trailing punctuation/whitespace.
pub fn normalize(text: &str) -> String {
    let trimmed = text.trim();
    let stripped = trimmed.trim_end_matches(|c: char| c.is_whitespace() || is_trailing_punct(c));
    stripped.to_lowercase()
}

fn is_trailing_punct(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | ',' | ';' | ':')
}

/// Word count using whitespace splitting — good enough for analytic and
/// most agglutinative languages; grammar-specific tokenization lives in
/// `gate_data.rs` where the scoring logic actually needs it.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().filter(|w| !w.is_empty()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_punctuation_and_case() {
        assert_eq!(normalize("Thank You!  "), "thank you");
        assert_eq!(normalize("Hello, how are you?"), "hello, how are you");
    }

    #[test]
    fn word_count_ignores_extra_whitespace() {
        assert_eq!(word_count("  hello   world  "), 2);
        assert_eq!(word_count(""), 0);
    }
}
