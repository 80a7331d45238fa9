//! Unicode-range script detectors.
//!
//! Each detector answers "does this text contain at least one character
//! of the script". Inputs are untrusted free text (file names, captions,
//! recognizer output).

/// Thai (U+0E00–U+0E7F).
pub fn has_thai(s: &str) -> bool {
    s.chars().any(|c| ('\u{0E00}'..='\u{0E7F}').contains(&c))
}

/// Hiragana, Katakana, Katakana phonetic extensions, half-width kana.
pub fn has_japanese(s: &str) -> bool {
    s.chars().any(|c| {
        ('\u{3040}'..='\u{30FF}').contains(&c)
            || ('\u{31F0}'..='\u{31FF}').contains(&c)
            || ('\u{FF66}'..='\u{FF9F}').contains(&c)
    })
}

/// CJK Unified Ideographs (U+4E00–U+9FFF).
pub fn has_chinese(s: &str) -> bool {
    s.chars().any(|c| ('\u{4E00}'..='\u{9FFF}').contains(&c))
}

/// Hangul syllables (U+AC00–U+D7AF).
pub fn has_korean(s: &str) -> bool {
    s.chars().any(|c| ('\u{AC00}'..='\u{D7AF}').contains(&c))
}

/// Cyrillic (U+0400–U+04FF), Russian and Ukrainian among others.
pub fn has_cyrillic(s: &str) -> bool {
    s.chars().any(|c| ('\u{0400}'..='\u{04FF}').contains(&c))
}

/// Khmer plus Khmer symbols (U+1780–U+17FF, U+19E0–U+19FF).
pub fn has_khmer(s: &str) -> bool {
    s.chars().any(|c| {
        ('\u{1780}'..='\u{17FF}').contains(&c) || ('\u{19E0}'..='\u{19FF}').contains(&c)
    })
}

/// Myanmar (U+1000–U+109F).
pub fn has_myanmar(s: &str) -> bool {
    s.chars().any(|c| ('\u{1000}'..='\u{109F}').contains(&c))
}

/// Devanagari (U+0900–U+097F).
pub fn has_devanagari(s: &str) -> bool {
    s.chars().any(|c| ('\u{0900}'..='\u{097F}').contains(&c))
}

/// Arabic plus supplement and extended-A (U+0600–U+06FF, U+0750–U+077F,
/// U+08A0–U+08FF).
pub fn has_arabic(s: &str) -> bool {
    s.chars().any(|c| {
        ('\u{0600}'..='\u{06FF}').contains(&c)
            || ('\u{0750}'..='\u{077F}').contains(&c)
            || ('\u{08A0}'..='\u{08FF}').contains(&c)
    })
}

/// Letters that appear in Ukrainian Cyrillic but not Russian.
const UK_CYRILLIC_LETTERS: &str = "ҐЄІЇґєії";

/// True when the text contains a Ukrainian-specific Cyrillic letter.
pub fn has_ukrainian_cyrillic(s: &str) -> bool {
    s.chars().any(|c| UK_CYRILLIC_LETTERS.contains(c))
}
