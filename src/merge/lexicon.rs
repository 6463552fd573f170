//! Danish editorial word lists
//!
//! Filler tokens are stripped inside utterances; backchannels drop whole
//! short utterances; the technical-meta lists catch studio talk about the
//! recording itself. Matching happens on normalized text (lowercased,
//! punctuation stripped).

/// Hesitation sounds removed from utterance text.
pub const FILLER_TOKENS: &[&str] = &["øh", "øhm", "æh", "æhm", "eh", "ehm", "hmm", "hm", "mmm"];

/// Words that form pure backchannel utterances ("ja", "nej tak", …).
pub const BACKCHANNEL_WORDS: &[&str] = &[
    "ja", "jo", "nej", "ok", "okay", "mm", "mmm", "nå", "aha", "klart", "præcis", "nemlig",
    "godt", "super", "fint", "enig", "tak",
];

/// Technical keywords: drop the utterance when it mentions one of these
/// and is short enough to be studio talk rather than content.
pub const META_KEYWORDS_SHORT: &[&str] = &[
    "mikrofon",
    "mikrofonen",
    "optagelse",
    "optagelsen",
    "optager",
    "optageren",
    "diktafon",
    "diktafonen",
    "lydfil",
    "lydfilen",
    "headset",
    "zoom",
    "teams",
];

/// Maximum word count for a short-context technical match.
pub const META_SHORT_MAX_WORDS: usize = 10;

/// Full phrases that mark technical-meta talk even in longer utterances.
pub const META_PHRASES_STRONG: &[&str] = &[
    "kan du høre mig",
    "kan i høre mig",
    "er der lyd på",
    "nu starter jeg optagelsen",
    "nu optager vi",
    "jeg sætter optagelsen i gang",
    "jeg stopper optagelsen lige",
    "vi tager lige en pause i optagelsen",
    "lad mig lige tjekke at den optager",
];

/// Maximum word count for a strong-context technical match.
pub const META_STRONG_MAX_WORDS: usize = 20;

/// Lowercases and strips everything but letters, digits, and whitespace,
/// collapsing runs of whitespace to single spaces.
pub fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
}

/// True when the normalized text is a pure backchannel of at most
/// `max_words` words.
pub fn is_backchannel(normalized: &str, max_words: usize) -> bool {
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.is_empty() || words.len() > max_words {
        return false;
    }
    words.iter().all(|w| BACKCHANNEL_WORDS.contains(w))
}

/// True when the normalized text reads as technical-meta studio talk.
pub fn is_technical_meta(normalized: &str) -> bool {
    let word_count = normalized.split_whitespace().count();

    if word_count <= META_SHORT_MAX_WORDS {
        let has_keyword = normalized
            .split_whitespace()
            .any(|w| META_KEYWORDS_SHORT.contains(&w));
        if has_keyword {
            return true;
        }
    }

    if word_count <= META_STRONG_MAX_WORDS {
        return META_PHRASES_STRONG
            .iter()
            .any(|phrase| normalized.contains(phrase));
    }

    false
}
