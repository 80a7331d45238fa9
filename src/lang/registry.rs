//! Central registry of language codes, aliases, pools, and Latin hints.
//!
//! Everything that used to be a magic string lives here: the BCP-47
//! fallback pool, short-code aliases from user-facing pickers, the
//! primary candidate set, and the frequent-word hints for Latin-script
//! languages.

use std::collections::HashMap;

/// Fallback alternate pool, in top-up order. English leads as the
/// general-purpose fallback.
pub const FALLBACK_ALTS_ORDER: &[&str] = &[
    "en-US",
    // East / Southeast Asia
    "th-TH",
    "ja-JP",
    "cmn-Hans-CN",
    "cmn-Hant-TW",
    "yue-Hant-HK",
    "ko-KR",
    "vi-VN",
    "id-ID",
    "tl-PH",
    "fil-PH",
    "km-KH",
    "my-MM",
    // South Asia / Middle East
    "hi-IN",
    "ar-SA",
    // Europe
    "ru-RU",
    "uk-UA",
    "fr-FR",
    "de-DE",
    "es-ES",
    "it-IT",
    "pt-PT",
    "pl-PL",
];

/// Candidate set for dynamic primary selection. Kept small: these are
/// the languages actually seen as primaries in the wild.
pub const PRIMARY_CANDIDATES: &[&str] = &[
    "th-TH",
    "ja-JP",
    "cmn-Hans-CN",
    "ko-KR",
    "ru-RU",
    "vi-VN",
    "en-US",
];

/// Normalize a caller-supplied code to the BCP-47 form the recognizer
/// expects. Mapping is by base language, so short codes, aliases, and
/// regional variants of a mapped base all collapse to its canonical tag;
/// unmapped bases (`cmn`, `yue`, `fil`, …) keep their full tag.
pub fn normalize_code(code: &str) -> String {
    let trimmed = code.trim();
    let base = trimmed
        .split('-')
        .next()
        .unwrap_or(trimmed)
        .to_ascii_lowercase();
    match base.as_str() {
        "th" => "th-TH",
        "en" => "en-US",
        "ja" | "jp" => "ja-JP",
        "zh" => "cmn-Hans-CN",
        "ko" => "ko-KR",
        "vi" => "vi-VN",
        "ru" => "ru-RU",
        "fr" => "fr-FR",
        "de" => "de-DE",
        "es" => "es-ES",
        "it" => "it-IT",
        "pt" => "pt-PT",
        "pl" => "pl-PL",
        "uk" => "uk-UA",
        "km" | "kh" => "km-KH",
        "my" => "my-MM",
        "hi" => "hi-IN",
        "ar" => "ar-SA",
        "id" => "id-ID",
        _ => return trimmed.to_owned(),
    }
    .to_owned()
}

/// A Latin-script language hint: a closed set of frequent words plus the
/// context-score boost a match earns.
pub struct LatinHint {
    /// BCP-47 code the hint votes for.
    pub code: &'static str,
    /// Context-bias boost applied on a match.
    pub bias: f32,
    /// Frequent words, matched case-insensitively as substrings.
    pub words: &'static [&'static str],
}

/// Latin hints in detection order (more distinctive languages first).
pub const LATIN_HINTS: &[LatinHint] = &[
    LatinHint {
        code: "vi-VN",
        bias: 1.6,
        words: &[
            "anh", "em", "và", "của", "không", "được", "cảm", "ơn", "tôi", "bạn",
        ],
    },
    LatinHint {
        code: "id-ID",
        bias: 1.4,
        words: &[
            "terima", "kasih", "apa", "kabar", "tidak", "ya", "saya", "kamu", "anda", "bagus",
        ],
    },
    LatinHint {
        code: "fil-PH",
        bias: 1.6,
        words: &[
            "salamat", "maganda", "mahal", "kita", "bakit", "saan", "paano", "ito", "iyan",
            "iyon", "wala", "meron", "opo", "po", "oo", "hindi", "kami", "kayo", "sila", "ikaw",
            "ako", "mga", "ang", "ng", "sa",
        ],
    },
    LatinHint {
        code: "fr-FR",
        bias: 1.2,
        words: &[
            "et", "merci", "non", "oui", "avec", "être", "c'est", "pas", "une", "des", "aux",
            "bonjour", "au revoir",
        ],
    },
    LatinHint {
        code: "de-DE",
        bias: 1.2,
        words: &[
            "und", "nicht", "danke", "nein", "ja", "ich", "über", "straße", "eine", "einen",
            "gibt", "bitte",
        ],
    },
    LatinHint {
        code: "es-ES",
        bias: 1.2,
        words: &[
            "gracias", "hola", "buenos", "no", "sí", "por", "favor", "porque", "pero", "muy",
            "adiós",
        ],
    },
    LatinHint {
        code: "it-IT",
        bias: 1.0,
        words: &["grazie", "ciao", "non", "sì", "per", "favore", "sono", "sei", "bene"],
    },
    LatinHint {
        code: "pt-PT",
        bias: 1.0,
        words: &[
            "obrigado", "olá", "não", "sim", "por", "favor", "você", "está", "tudo", "bom",
        ],
    },
    LatinHint {
        code: "pl-PL",
        bias: 1.0,
        words: &[
            "dziękuję", "cześć", "nie", "tak", "proszę", "bardzo", "dobrze", "jestem", "jesteś",
        ],
    },
];

/// True when the lowercased text matches any word of the hint.
pub fn matches_hint(lower_text: &str, hint: &LatinHint) -> bool {
    hint.words.iter().any(|w| lower_text.contains(w))
}

/// Seed scores for context biasing: every pooled code gets a small
/// baseline so it can rank, English a larger one as the safety net, and
/// the base language starts at zero.
pub fn seed_scores(base_lang: &str) -> HashMap<String, f32> {
    let mut seeds: HashMap<String, f32> = FALLBACK_ALTS_ORDER
        .iter()
        .map(|&code| (code.to_owned(), 0.1))
        .collect();
    seeds.insert("en-US".to_owned(), 0.4);
    seeds.insert(base_lang.to_owned(), 0.0);
    seeds
}
