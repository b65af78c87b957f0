//! 重み付き辞書による極性スコアラー。
//!
//! 同梱のベース辞書にスラング上書き表を重ね（衝突時は上書き側が優先）、
//! トークンごとの重みを否定語・強調語で補正して合計する。乱数や外部状態に
//! 依存しないため、同じテキストには常に同じ結果を返す。
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

mod overrides;

pub use overrides::{LexiconOverrideError, LexiconOverrides};

use crate::error::EngineError;
use crate::review::{
    NormalizedText, ScoreNotes, ScoreResult, ScorerOutcome, SentimentLabel, SlangContribution,
};
use crate::scorer::{SentimentScorer, Technique};

const BASE_LEXICON_TSV: &str = include_str!("../../resources/base_lexicon.tsv");

/// 否定語が極性語の重みに掛ける係数。
const NEGATION_SCALAR: f64 = -0.74;
/// 強調語・弱め語による重みの増減幅。
const BOOSTER_INCREMENT: f64 = 0.293;
/// `|x| / sqrt(x^2 + alpha)` の飽和定数。
const CONFIDENCE_ALPHA: f64 = 15.0;

const NEGATORS: &[&str] = &[
    "not", "no", "never", "none", "nothing", "nobody", "neither", "nor", "nowhere", "cannot",
    "cant", "can't", "dont", "don't", "doesnt", "doesn't", "didnt", "didn't", "isnt", "isn't",
    "arent", "aren't", "wasnt", "wasn't", "werent", "weren't", "wont", "won't", "wouldnt",
    "wouldn't", "shouldnt", "shouldn't", "couldnt", "couldn't", "aint", "ain't", "hardly",
    "rarely", "seldom", "without",
];

const BOOSTERS: &[&str] = &[
    "very", "really", "extremely", "super", "so", "totally", "absolutely", "incredibly",
    "insanely", "hugely", "highly", "completely", "utterly", "truly", "most", "mega",
];

const DAMPENERS: &[&str] = &[
    "slightly", "somewhat", "kinda", "sorta", "barely", "marginally", "little", "partly",
    "occasionally",
];

#[derive(Debug, Error)]
pub enum LexiconError {
    #[error("lexicon is empty after merging base and override tables")]
    Empty,
    #[error("invalid base lexicon line {line}: {content:?}")]
    InvalidBaseLine { line: usize, content: String },
    #[error(transparent)]
    Overrides(#[from] LexiconOverrideError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntrySource {
    Base,
    Override,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LexiconEntry {
    weight: f64,
    source: EntrySource,
}

/// ベース辞書と上書き表をマージした読み取り専用の辞書。
#[derive(Debug, Clone)]
pub struct Lexicon {
    entries: FxHashMap<String, LexiconEntry>,
}

impl Lexicon {
    /// 同梱ベース辞書に上書き表を重ねて構築する。
    ///
    /// # Errors
    /// ベース辞書の行が不正、またはマージ結果が空の場合はエラー。
    pub fn with_bundled_base(overrides: &LexiconOverrides) -> Result<Self, LexiconError> {
        let base = parse_base_lexicon(BASE_LEXICON_TSV)?;
        Self::from_tables(base, &overrides.terms)
    }

    /// 任意のベース表と上書き表から構築する（テスト・差し替え用）。
    ///
    /// # Errors
    /// マージ結果が空の場合は [`LexiconError::Empty`]。
    pub fn from_tables<I, K>(
        base: I,
        overrides: &std::collections::BTreeMap<String, f64>,
    ) -> Result<Self, LexiconError>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        let mut entries: FxHashMap<String, LexiconEntry> = FxHashMap::default();
        for (term, weight) in base {
            entries.insert(
                term.as_ref().to_lowercase(),
                LexiconEntry {
                    weight,
                    source: EntrySource::Base,
                },
            );
        }
        for (term, weight) in overrides {
            entries.insert(
                term.to_lowercase(),
                LexiconEntry {
                    weight: *weight,
                    source: EntrySource::Override,
                },
            );
        }
        if entries.is_empty() {
            return Err(LexiconError::Empty);
        }
        Ok(Self { entries })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn weight(&self, term: &str) -> Option<f64> {
        self.entries.get(term).map(|entry| entry.weight)
    }

    #[must_use]
    pub fn is_override(&self, term: &str) -> bool {
        self.entries
            .get(term)
            .is_some_and(|entry| entry.source == EntrySource::Override)
    }
}

fn parse_base_lexicon(raw: &str) -> Result<Vec<(String, f64)>, LexiconError> {
    let mut entries = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.split('\t');
        let parsed = match (parts.next(), parts.next()) {
            (Some(term), Some(weight)) => weight
                .trim()
                .parse::<f64>()
                .ok()
                .map(|weight| (term.trim().to_string(), weight)),
            _ => None,
        };
        let Some(entry) = parsed else {
            return Err(LexiconError::InvalidBaseLine {
                line: idx + 1,
                content: trimmed.to_string(),
            });
        };
        entries.push(entry);
    }
    Ok(entries)
}

/// 採点パラメータ。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexiconSettings {
    /// `> +threshold` でPositive、`< -threshold` でNegative。
    pub threshold: f64,
    /// 否定語を探す直前トークン数。
    pub negation_window: usize,
}

impl Default for LexiconSettings {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            negation_window: 3,
        }
    }
}

/// 辞書ベースのスコアラー。
#[derive(Debug, Clone)]
pub struct LexiconScorer {
    lexicon: Arc<Lexicon>,
    settings: LexiconSettings,
    negators: FxHashSet<&'static str>,
    boosters: FxHashSet<&'static str>,
    dampeners: FxHashSet<&'static str>,
}

impl LexiconScorer {
    #[must_use]
    pub fn new(lexicon: Arc<Lexicon>, settings: LexiconSettings) -> Self {
        Self {
            lexicon,
            settings,
            negators: NEGATORS.iter().copied().collect(),
            boosters: BOOSTERS.iter().copied().collect(),
            dampeners: DAMPENERS.iter().copied().collect(),
        }
    }

    /// テキストを採点する。同期・決定的。
    #[must_use]
    pub fn score_text(&self, text: &NormalizedText) -> ScoreResult {
        let tokens = tokenize(text.as_str());
        let mut total = 0.0_f64;
        let mut slang_terms = Vec::new();

        for (idx, token) in tokens.iter().enumerate() {
            let Some(base_weight) = self.lexicon.weight(token) else {
                continue;
            };
            let weight = self.adjust(&tokens, idx, base_weight);
            total += weight;
            if self.lexicon.is_override(token) {
                slang_terms.push(SlangContribution {
                    term: token.clone(),
                    contribution: weight,
                });
            }
        }

        let label = if total > self.settings.threshold {
            SentimentLabel::Positive
        } else if total < -self.settings.threshold {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        };
        let confidence = total.abs() / (total * total + CONFIDENCE_ALPHA).sqrt();

        ScoreResult::new(label, confidence, total).with_notes(ScoreNotes {
            truncated_tokens: None,
            slang_terms,
        })
    }

    /// 直前の強調語と窓内の否定語で重みを補正する。補正で符号は反転させない（否定を除く）。
    fn adjust(&self, tokens: &[String], idx: usize, weight: f64) -> f64 {
        let mut adjusted = weight;

        if let Some(prev) = idx.checked_sub(1).map(|i| tokens[i].as_str()) {
            let increment = if self.boosters.contains(prev) {
                BOOSTER_INCREMENT
            } else if self.dampeners.contains(prev) {
                -BOOSTER_INCREMENT
            } else {
                0.0
            };
            if increment != 0.0 {
                let magnitude = (adjusted.abs() + increment).max(0.0);
                adjusted = magnitude.copysign(adjusted);
            }
        }

        let window_start = idx.saturating_sub(self.settings.negation_window);
        if tokens[window_start..idx]
            .iter()
            .any(|token| self.negators.contains(token.as_str()))
        {
            adjusted *= NEGATION_SCALAR;
        }

        adjusted
    }
}

#[async_trait]
impl SentimentScorer for LexiconScorer {
    fn technique(&self) -> Technique {
        Technique::Lexicon
    }

    async fn score(&self, text: &NormalizedText) -> Result<ScorerOutcome, EngineError> {
        Ok(ScorerOutcome::Scored(self.score_text(text)))
    }
}

/// UAX#29の単語境界で分割し、小文字化する。
fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(|word| word.replace('\u{2019}', "'").to_lowercase())
        .collect()
}
