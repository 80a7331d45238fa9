//! Language selection from context signals and recognition history.
//!
//! Selection runs in three steps: a context bias over the fallback pool
//! (scripts and Latin word hints seen in names and captions), a dynamic
//! primary pick combining the bias with the per-user and per-channel
//! histograms, and a two-round alternate split used by the retry ladder.

use std::collections::HashMap;

use crate::config::LangConfig;
use crate::lang::history::LangHistogram;
use crate::lang::registry::{
    self, FALLBACK_ALTS_ORDER, LATIN_HINTS, PRIMARY_CANDIDATES,
};
use crate::lang::script;

/// Histogram weight for the requesting user's own history.
const USER_HIST_WEIGHT: f32 = 1.4;
/// Histogram weight for the channel's history.
const CHANNEL_HIST_WEIGHT: f32 = 0.8;
/// Primary candidates scoring below this fall back to the default.
const PRIMARY_MIN_SCORE: f32 = 1.0;
/// Alternates per recognition round; the recognizer caps at three.
const PER_ROUND_LIMIT: usize = 3;

/// Free-text context around one attachment. All fields untrusted.
#[derive(Debug, Clone, Copy, Default)]
pub struct LangContext<'a> {
    /// Display name of the posting user.
    pub user_name: &'a str,
    /// Name of the channel the attachment landed in.
    pub channel_name: &'a str,
    /// Message text accompanying the attachment.
    pub caption: &'a str,
    /// Original attachment file name.
    pub file_name: &'a str,
}

/// The resolver's answer: a primary plus two alternate rounds.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageHints {
    /// Primary language submitted on every attempt.
    pub primary: String,
    /// Alternates for the first retry; `None` when the context is
    /// confident enough to run strict.
    pub round_1: Option<Vec<String>>,
    /// Alternates for the second retry, disjoint from round 1.
    pub round_2: Option<Vec<String>>,
    /// Context score of the primary, for logging.
    pub primary_score: f32,
}

fn add(score: &mut HashMap<String, f32>, code: &str, v: f32) {
    *score.entry(code.to_owned()).or_insert(0.0) += v;
}

/// Language resolver configured with defaults and thresholds.
#[derive(Debug, Clone)]
pub struct LanguageResolver {
    config: LangConfig,
}

impl LanguageResolver {
    /// Create a resolver from the language configuration.
    pub fn new(config: LangConfig) -> Self {
        Self { config }
    }

    /// Score the fallback pool from free-text context.
    ///
    /// Scripts are strong signals (+2.0, with Chinese split across its
    /// three recognizer variants); Latin word hints are weaker
    /// (+1.0–1.6). Ukrainian-specific Cyrillic letters re-bias away
    /// from Russian.
    pub fn context_bias(&self, ctx: &LangContext<'_>) -> HashMap<String, f32> {
        let mut score = registry::seed_scores(&self.config.default_primary);
        let blob = format!(
            "{} {} {} {}",
            ctx.user_name, ctx.channel_name, ctx.caption, ctx.file_name
        );

        if script::has_thai(&blob) {
            add(&mut score, "th-TH", 2.0);
        }
        if script::has_japanese(&blob) {
            add(&mut score, "ja-JP", 2.0);
        }
        if script::has_chinese(&blob) {
            add(&mut score, "cmn-Hans-CN", 1.4);
            add(&mut score, "cmn-Hant-TW", 1.0);
            add(&mut score, "yue-Hant-HK", 0.6);
        }
        if script::has_korean(&blob) {
            add(&mut score, "ko-KR", 2.0);
        }
        if script::has_cyrillic(&blob) {
            add(&mut score, "ru-RU", 2.0);
        }
        if script::has_ukrainian_cyrillic(&blob) {
            add(&mut score, "uk-UA", 2.2);
            if let Some(ru) = score.get_mut("ru-RU") {
                *ru *= 0.6;
            }
        }
        if script::has_khmer(&blob) {
            add(&mut score, "km-KH", 2.0);
        }
        if script::has_myanmar(&blob) {
            add(&mut score, "my-MM", 2.0);
        }
        if script::has_devanagari(&blob) {
            add(&mut score, "hi-IN", 2.0);
        }
        if script::has_arabic(&blob) {
            add(&mut score, "ar-SA", 2.0);
        }

        let lower = blob.to_lowercase();
        for hint in LATIN_HINTS {
            if registry::matches_hint(&lower, hint) {
                add(&mut score, hint.code, hint.bias);
            }
        }

        score
    }

    /// Pick the primary language for an utterance.
    ///
    /// Among the fixed candidate set, the best combined score of context
    /// bias and histograms wins; below the minimum it falls back to the
    /// configured default. Japanese script anywhere in the file name or
    /// caption wins outright.
    pub fn select_primary(
        &self,
        bias: &HashMap<String, f32>,
        user_hist: &LangHistogram,
        channel_hist: &LangHistogram,
        ctx: &LangContext<'_>,
    ) -> (String, f32) {
        if script::has_japanese(ctx.file_name) || script::has_japanese(ctx.caption) {
            let score = bias.get("ja-JP").copied().unwrap_or(0.0);
            return ("ja-JP".to_owned(), score.max(2.0));
        }

        let mut best: Option<(&str, f32)> = None;
        for &code in PRIMARY_CANDIDATES {
            let score = bias.get(code).copied().unwrap_or(0.0)
                + USER_HIST_WEIGHT * user_hist.get(code).copied().unwrap_or(0) as f32
                + CHANNEL_HIST_WEIGHT * channel_hist.get(code).copied().unwrap_or(0) as f32;
            match best {
                Some((_, s)) if s >= score => {}
                _ => best = Some((code, score)),
            }
        }

        match best {
            Some((code, score)) if score >= PRIMARY_MIN_SCORE => (code.to_owned(), score),
            Some((_, score)) => (self.config.default_primary.clone(), score),
            None => (self.config.default_primary.clone(), 0.0),
        }
    }

    /// Rank alternates across the full fallback pool.
    ///
    /// Weights: 0.8·channel history + 1.4·user history + 1.0·context
    /// bias. The primary is excluded; positive-weight codes rank first,
    /// then the fallback order tops the list up to `max_alts`.
    pub fn rank_alternates(
        &self,
        primary: &str,
        bias: &HashMap<String, f32>,
        user_hist: &LangHistogram,
        channel_hist: &LangHistogram,
        max_alts: usize,
    ) -> Vec<String> {
        let mut weights: HashMap<&str, f32> = FALLBACK_ALTS_ORDER
            .iter()
            .map(|&code| (code, 0.0))
            .collect();

        for (code, count) in channel_hist {
            if let Some(w) = weights.get_mut(code.as_str()) {
                *w += CHANNEL_HIST_WEIGHT * *count as f32;
            }
        }
        for (code, count) in user_hist {
            if let Some(w) = weights.get_mut(code.as_str()) {
                *w += USER_HIST_WEIGHT * *count as f32;
            }
        }
        for (code, v) in bias {
            if let Some(w) = weights.get_mut(code.as_str()) {
                *w += v;
            }
        }

        if self.config.damp_japanese_when_uncertain {
            let user_jp = user_hist.get("ja-JP").copied().unwrap_or(0);
            if let Some(w) = weights.get_mut("ja-JP") {
                if user_jp < 2 && *w < 2.0 {
                    *w *= 0.4;
                }
            }
        }

        // Stable sort over the pool order, so equal weights keep the
        // fallback ordering.
        let mut ranked: Vec<(&str, f32)> = FALLBACK_ALTS_ORDER
            .iter()
            .filter(|&&code| code != primary)
            .map(|&code| (code, weights.get(code).copied().unwrap_or(0.0)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut alts: Vec<String> = ranked
            .iter()
            .filter(|(_, w)| *w > 0.0)
            .take(max_alts)
            .map(|(code, _)| (*code).to_owned())
            .collect();

        if alts.len() < max_alts {
            for &code in FALLBACK_ALTS_ORDER {
                if code != primary && !alts.iter().any(|a| a == code) {
                    alts.push(code.to_owned());
                }
                if alts.len() >= max_alts {
                    break;
                }
            }
        }

        // Code-switch insurance: Thai, Khmer, and Myanmar speakers mix
        // in English often enough that it must stay reachable.
        let base = primary.split('-').next().unwrap_or(primary);
        if matches!(base, "th" | "km" | "my") && !alts.iter().any(|a| a == "en-US") {
            alts.insert(0, "en-US".to_owned());
            alts.truncate(max_alts);
        }

        alts.truncate(max_alts);
        alts
    }

    /// Full resolution: primary (or override) plus the two-round split.
    pub fn resolve(
        &self,
        ctx: &LangContext<'_>,
        user_hist: &LangHistogram,
        channel_hist: &LangHistogram,
        primary_override: Option<&str>,
    ) -> LanguageHints {
        let bias = self.context_bias(ctx);

        let (primary, primary_score) = match primary_override {
            Some(code) => {
                let normalized = registry::normalize_code(code);
                let score = bias.get(&normalized).copied().unwrap_or(0.0);
                (normalized, score)
            }
            None => self.select_primary(&bias, user_hist, channel_hist, ctx),
        };

        let ranked = self.rank_alternates(
            &primary,
            &bias,
            user_hist,
            channel_hist,
            PER_ROUND_LIMIT * 2,
        );

        let confident = primary_score >= self.config.strict_confidence_threshold;
        let first: Vec<String> = ranked.iter().take(PER_ROUND_LIMIT).cloned().collect();
        let rest: Vec<String> = ranked.iter().skip(PER_ROUND_LIMIT).cloned().collect();

        let round_1 = if confident || first.is_empty() {
            None
        } else {
            Some(first.clone())
        };
        let mut round_2 = if rest.is_empty() { None } else { Some(rest) };

        // When the strict pass consumed round 1, the first slice becomes
        // the fallback round.
        if round_1.is_none() && round_2.is_none() && !first.is_empty() {
            round_2 = Some(first);
        }

        LanguageHints {
            primary,
            round_1,
            round_2,
            primary_score,
        }
    }

    /// Classify recognizer output by dominant script, for feeding the
    /// histograms. Chinese defaults to simplified; Ukrainian-specific
    /// letters override the Russian guess.
    pub fn detect_script_from_text(&self, s: &str) -> &'static str {
        if script::has_thai(s) {
            return "th-TH";
        }
        if script::has_japanese(s) {
            return "ja-JP";
        }
        if script::has_korean(s) {
            return "ko-KR";
        }
        if script::has_chinese(s) {
            return "cmn-Hans-CN";
        }
        if script::has_khmer(s) {
            return "km-KH";
        }
        if script::has_myanmar(s) {
            return "my-MM";
        }
        if script::has_devanagari(s) {
            return "hi-IN";
        }
        if script::has_arabic(s) {
            return "ar-SA";
        }
        if script::has_cyrillic(s) {
            if script::has_ukrainian_cyrillic(s) {
                return "uk-UA";
            }
            return "ru-RU";
        }

        let lower = s.to_lowercase();
        for hint in LATIN_HINTS {
            if registry::matches_hint(&lower, hint) {
                return hint.code;
            }
        }
        "en-US"
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn resolver() -> LanguageResolver {
        LanguageResolver::new(LangConfig::default())
    }

    fn hist(entries: &[(&str, u32)]) -> LangHistogram {
        entries.iter().map(|(k, v)| ((*k).to_owned(), *v)).collect()
    }

    #[test]
    fn thai_script_boosts_thai() {
        let ctx = LangContext {
            caption: "ฟังหน่อย",
            ..Default::default()
        };
        let bias = resolver().context_bias(&ctx);
        assert!((bias["th-TH"] - 2.0).abs() < f32::EPSILON);
    }

    #[test]
    fn chinese_splits_across_variants() {
        let ctx = LangContext {
            caption: "你好",
            ..Default::default()
        };
        let bias = resolver().context_bias(&ctx);
        assert!((bias["cmn-Hans-CN"] - 1.5).abs() < 1e-4);
        assert!((bias["cmn-Hant-TW"] - 1.1).abs() < 1e-4);
        assert!((bias["yue-Hant-HK"] - 0.7).abs() < 1e-4);
    }

    #[test]
    fn ukrainian_letters_rebias_cyrillic() {
        let ctx = LangContext {
            caption: "Привіт, як справи? Ґанок",
            ..Default::default()
        };
        let bias = resolver().context_bias(&ctx);
        // ru seeded 0.1, +2.0 for Cyrillic, then ×0.6.
        assert!((bias["ru-RU"] - 1.26).abs() < 1e-4);
        assert!(bias["uk-UA"] > 2.0);
        assert!(bias["uk-UA"] > bias["ru-RU"]);
    }

    #[test]
    fn latin_hint_boosts() {
        let ctx = LangContext {
            caption: "cảm ơn bạn",
            ..Default::default()
        };
        let bias = resolver().context_bias(&ctx);
        assert!(bias["vi-VN"] >= 1.6);
    }

    #[test]
    fn primary_falls_back_below_threshold() {
        let r = resolver();
        let ctx = LangContext::default();
        let bias = r.context_bias(&ctx);
        let (primary, score) =
            r.select_primary(&bias, &LangHistogram::new(), &LangHistogram::new(), &ctx);
        assert_eq!(primary, "th-TH");
        assert!(score < 1.0);
    }

    #[test]
    fn user_history_drives_primary() {
        let r = resolver();
        let ctx = LangContext::default();
        let bias = r.context_bias(&ctx);
        let user = hist(&[("ko-KR", 3)]);
        let (primary, score) = r.select_primary(&bias, &user, &LangHistogram::new(), &ctx);
        assert_eq!(primary, "ko-KR");
        assert!(score >= 1.4 * 3.0);
    }

    #[test]
    fn japanese_in_filename_forces_primary() {
        let r = resolver();
        let ctx = LangContext {
            file_name: "ボイスメモ.m4a",
            ..Default::default()
        };
        let bias = r.context_bias(&ctx);
        let (primary, _) =
            r.select_primary(&bias, &LangHistogram::new(), &LangHistogram::new(), &ctx);
        assert_eq!(primary, "ja-JP");
    }

    #[test]
    fn alternates_exclude_primary_and_cap_at_limit() {
        let r = resolver();
        let ctx = LangContext::default();
        let bias = r.context_bias(&ctx);
        let alts = r.rank_alternates(
            "th-TH",
            &bias,
            &LangHistogram::new(),
            &LangHistogram::new(),
            3,
        );
        assert_eq!(alts.len(), 3);
        assert!(!alts.contains(&"th-TH".to_owned()));
        // en-US leads: highest seed plus code-switch insurance.
        assert_eq!(alts[0], "en-US");
    }

    #[test]
    fn english_insurance_for_khmer_primary() {
        let r = resolver();
        let user = hist(&[("ja-JP", 5), ("ko-KR", 4), ("vi-VN", 3), ("ru-RU", 2)]);
        let bias = r.context_bias(&LangContext::default());
        let alts = r.rank_alternates("km-KH", &bias, &user, &LangHistogram::new(), 3);
        assert!(alts.contains(&"en-US".to_owned()));
        assert_eq!(alts.len(), 3);
    }

    #[test]
    fn rounds_are_disjoint() {
        let r = resolver();
        let ctx = LangContext::default();
        let hints = r.resolve(&ctx, &LangHistogram::new(), &LangHistogram::new(), None);
        let r1 = hints.round_1.clone().unwrap_or_default();
        let r2 = hints.round_2.clone().unwrap_or_default();
        assert!(!r1.is_empty());
        assert!(r1.len() <= 3 && r2.len() <= 3);
        for code in &r1 {
            assert!(!r2.contains(code), "{code} present in both rounds");
        }
    }

    #[test]
    fn confident_context_goes_strict() {
        let r = resolver();
        let ctx = LangContext {
            channel_name: "ห้องคุยไทย",
            ..Default::default()
        };
        let hints = r.resolve(&ctx, &LangHistogram::new(), &LangHistogram::new(), None);
        assert_eq!(hints.primary, "th-TH");
        assert!(hints.primary_score >= 2.0);
        assert!(hints.round_1.is_none());
        assert!(hints.round_2.is_some());
    }

    #[test]
    fn override_is_normalized() {
        let r = resolver();
        let ctx = LangContext::default();
        let hints = r.resolve(
            &ctx,
            &LangHistogram::new(),
            &LangHistogram::new(),
            Some("jp"),
        );
        assert_eq!(hints.primary, "ja-JP");
    }

    #[test]
    fn damping_suppresses_unbacked_japanese() {
        let config = LangConfig {
            damp_japanese_when_uncertain: true,
            ..Default::default()
        };
        let r = LanguageResolver::new(config);
        let bias = r.context_bias(&LangContext::default());
        let alts = r.rank_alternates(
            "th-TH",
            &bias,
            &LangHistogram::new(),
            &hist(&[("ja-JP", 1)]),
            3,
        );
        // ja-JP's weight (0.1 bias + 0.8 channel) damps below vi-VN's seed.
        let ja_pos = alts.iter().position(|a| a == "ja-JP");
        assert!(ja_pos.is_none() || ja_pos > alts.iter().position(|a| a == "en-US"));
    }

    #[test]
    fn script_detection_feeds_histograms() {
        let r = resolver();
        assert_eq!(r.detect_script_from_text("สวัสดีครับ"), "th-TH");
        assert_eq!(r.detect_script_from_text("こんにちは"), "ja-JP");
        assert_eq!(r.detect_script_from_text("안녕하세요"), "ko-KR");
        assert_eq!(r.detect_script_from_text("你好吗"), "cmn-Hans-CN");
        assert_eq!(r.detect_script_from_text("привет"), "ru-RU");
        assert_eq!(r.detect_script_from_text("привіт, їжак"), "uk-UA");
        assert_eq!(r.detect_script_from_text("cảm ơn"), "vi-VN");
        assert_eq!(r.detect_script_from_text("hello there"), "en-US");
    }
}
