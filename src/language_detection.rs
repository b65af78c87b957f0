//! `lingua`ベースの言語ゲート。
//!
//! 対象言語以外・空文字列のレビューを採点前に除外する。判定不能な場合は
//! 除外側に倒す（fail closed）。本文全体がスラング許可リストの語と一致する
//! 場合のみ、検出器の結果に関わらず通過させる。
use std::str::FromStr;

use lingua::{IsoCode639_1, Language, LanguageDetector, LanguageDetectorBuilder};
use rustc_hash::FxHashSet;
use thiserror::Error;
use tracing::debug;

use crate::review::{FilterReason, LanguageVerdict, NormalizedText};

/// 言語検出器の抽象。ISO 639-1コードを返し、判定不能なら`None`。
pub trait LanguageDetection: Send + Sync {
    fn detect(&self, text: &str) -> Option<String>;
}

/// `lingua`による検出器。コンパイル時に有効化した全言語を候補にする。
pub struct LinguaDetector {
    detector: LanguageDetector,
}

impl std::fmt::Debug for LinguaDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinguaDetector").finish_non_exhaustive()
    }
}

impl LinguaDetector {
    #[must_use]
    pub fn new(min_relative_distance: f64) -> Self {
        let detector = LanguageDetectorBuilder::from_all_languages()
            .with_minimum_relative_distance(min_relative_distance)
            .build();
        Self { detector }
    }
}

impl LanguageDetection for LinguaDetector {
    fn detect(&self, text: &str) -> Option<String> {
        self.detector
            .detect_language_of(text)
            .map(|language| language.iso_code_639_1().to_string().to_lowercase())
    }
}

#[derive(Debug, Error)]
pub enum GateConfigError {
    #[error("unsupported target language code: {0}")]
    UnsupportedLanguage(String),
}

/// ゲートの設定値。閾値や許可リストは定数ではなく設定として受け取る。
#[derive(Debug, Clone, PartialEq)]
pub struct GateSettings {
    pub target_language: String,
    pub slang_allowlist: Vec<String>,
    pub min_chars: usize,
}

/// 言語ゲート本体。
pub struct LanguageGate {
    target: String,
    allowlist: FxHashSet<String>,
    min_chars: usize,
    detector: Box<dyn LanguageDetection>,
}

impl std::fmt::Debug for LanguageGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageGate")
            .field("target", &self.target)
            .field("allowlist", &self.allowlist)
            .field("min_chars", &self.min_chars)
            .finish_non_exhaustive()
    }
}

impl LanguageGate {
    /// `lingua`検出器付きでゲートを構築する。
    ///
    /// # Errors
    /// 対象言語コードが有効化された言語に含まれない場合は [`GateConfigError`] を返す。
    pub fn with_lingua(
        settings: &GateSettings,
        min_relative_distance: f64,
    ) -> Result<Self, GateConfigError> {
        let code = settings.target_language.trim().to_lowercase();
        let supported = IsoCode639_1::from_str(&code)
            .ok()
            .map(|iso| Language::from_iso_code_639_1(&iso))
            .is_some_and(|language| Language::all().contains(&language));
        if !supported {
            return Err(GateConfigError::UnsupportedLanguage(code));
        }
        Ok(Self::new(
            settings,
            Box::new(LinguaDetector::new(min_relative_distance)),
        ))
    }

    #[must_use]
    pub fn new(settings: &GateSettings, detector: Box<dyn LanguageDetection>) -> Self {
        let allowlist = settings
            .slang_allowlist
            .iter()
            .map(|token| token.trim().to_lowercase())
            .filter(|token| !token.is_empty())
            .collect();
        Self {
            target: settings.target_language.trim().to_lowercase(),
            allowlist,
            min_chars: settings.min_chars,
            detector,
        }
    }

    #[must_use]
    pub fn target_language(&self) -> &str {
        &self.target
    }

    /// 正規化済みテキストを判定する。
    #[must_use]
    pub fn evaluate(&self, text: &NormalizedText) -> LanguageVerdict {
        if text.is_empty() {
            return LanguageVerdict::Filtered(FilterReason::Empty);
        }

        if self.is_allowlisted(text.as_str()) {
            return LanguageVerdict::Accepted;
        }

        // 短文では検出器の精度が出ないため、許可リスト外は除外する
        if text.char_count() < self.min_chars {
            return LanguageVerdict::Filtered(FilterReason::NonTargetLanguage);
        }

        match self.detector.detect(text.as_str()) {
            Some(code) if code == self.target => LanguageVerdict::Accepted,
            Some(code) => {
                debug!(detected = %code, target = %self.target, "review filtered by language");
                LanguageVerdict::Filtered(FilterReason::NonTargetLanguage)
            }
            None => {
                debug!(target = %self.target, "language detector could not classify review");
                LanguageVerdict::Filtered(FilterReason::NonTargetLanguage)
            }
        }
    }

    /// 本文全体（前後の記号を除く）が許可リストの語と一致するか。
    /// 長文中に含まれるだけでは一致とみなさない。
    fn is_allowlisted(&self, text: &str) -> bool {
        if self.allowlist.is_empty() {
            return false;
        }
        let trimmed = text.trim_matches(|c: char| !c.is_alphanumeric());
        !trimmed.is_empty() && self.allowlist.contains(&trimmed.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use rstest::rstest;

    /// 常に固定の言語を返す検出器。
    struct FixedDetector(Option<&'static str>);

    impl LanguageDetection for FixedDetector {
        fn detect(&self, _text: &str) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    fn settings() -> GateSettings {
        GateSettings {
            target_language: "en".into(),
            slang_allowlist: vec!["gg".into(), "GJ".into()],
            min_chars: 3,
        }
    }

    fn gate(detected: Option<&'static str>) -> LanguageGate {
        LanguageGate::new(&settings(), Box::new(FixedDetector(detected)))
    }

    #[test]
    fn empty_text_is_filtered_as_empty() {
        let verdict = gate(Some("en")).evaluate(&normalize("   "));
        assert_eq!(verdict, LanguageVerdict::Filtered(FilterReason::Empty));
    }

    #[rstest]
    #[case("gg")]
    #[case("GG")]
    #[case("gj!")]
    #[case("...GG...")]
    fn allowlisted_text_overrides_detector(#[case] body: &str) {
        let verdict = gate(Some("de")).evaluate(&normalize(body));
        assert_eq!(verdict, LanguageVerdict::Accepted);
    }

    #[rstest]
    #[case("ein tolles spiel, gg")]
    #[case("gg wp")]
    #[case("gj, gg")]
    fn allowlisted_token_inside_longer_text_does_not_override_detector(#[case] body: &str) {
        let verdict = gate(Some("de")).evaluate(&normalize(body));
        assert_eq!(
            verdict,
            LanguageVerdict::Filtered(FilterReason::NonTargetLanguage)
        );
    }

    #[test]
    fn short_text_outside_allowlist_is_filtered() {
        let verdict = gate(Some("en")).evaluate(&normalize("ok"));
        assert_eq!(
            verdict,
            LanguageVerdict::Filtered(FilterReason::NonTargetLanguage)
        );
    }

    #[test]
    fn undetectable_text_fails_closed() {
        let verdict = gate(None).evaluate(&normalize("???? !!!! ...."));
        assert_eq!(
            verdict,
            LanguageVerdict::Filtered(FilterReason::NonTargetLanguage)
        );
    }

    #[test]
    fn non_target_language_is_filtered() {
        let verdict = gate(Some("fr")).evaluate(&normalize("un jeu vraiment magnifique"));
        assert_eq!(
            verdict,
            LanguageVerdict::Filtered(FilterReason::NonTargetLanguage)
        );
    }

    #[test]
    fn filtering_is_idempotent() {
        let gate = gate(Some("ru"));
        let text = normalize("Отличная игра, всем советую");
        let first = gate.evaluate(&text);
        let second = gate.evaluate(&normalize(text.as_str()));
        assert_eq!(first, second);
        assert_eq!(first.reason(), FilterReason::NonTargetLanguage);
    }

    #[test]
    fn lingua_accepts_english_review() {
        let gate = LanguageGate::with_lingua(&settings(), 0.0).expect("english is enabled");
        let text = normalize("This game is absolutely fantastic and I recommend it to everyone.");
        assert_eq!(gate.evaluate(&text), LanguageVerdict::Accepted);
    }

    #[test]
    fn lingua_filters_german_review() {
        let gate = LanguageGate::with_lingua(&settings(), 0.0).expect("english is enabled");
        let text = normalize("Das Spiel ist wirklich großartig und macht sehr viel Spaß.");
        assert_eq!(
            gate.evaluate(&text),
            LanguageVerdict::Filtered(FilterReason::NonTargetLanguage)
        );
    }

    #[rstest]
    #[case("Das Spiel ist wirklich großartig und macht sehr viel Spaß, gg")]
    #[case("Отличная игра, всем советую, gg")]
    #[case("Juego muy malo, no lo compren, ez")]
    fn lingua_filters_foreign_review_ending_in_slang(#[case] body: &str) {
        let mut settings = settings();
        settings.slang_allowlist = vec!["gg".into(), "gj".into(), "ez".into(), "wp".into()];
        let gate = LanguageGate::with_lingua(&settings, 0.0).expect("english is enabled");
        assert_eq!(
            gate.evaluate(&normalize(body)),
            LanguageVerdict::Filtered(FilterReason::NonTargetLanguage)
        );
    }

    #[test]
    fn lingua_rejects_unsupported_target() {
        let mut settings = settings();
        settings.target_language = "xx".into();
        let error = LanguageGate::with_lingua(&settings, 0.0).expect_err("unknown code");
        assert!(matches!(error, GateConfigError::UnsupportedLanguage(code) if code == "xx"));
    }
}
