//! レビュー採点パイプラインのデータモデル。
//!
//! 生レビュー → 正規化テキスト → 言語判定 → 2系統のスコア → 照合結果、の
//! 各段階で受け渡す値を定義する。どの値も生成後に変更されない。
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// カタログから取得したままのレビュー。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReview {
    pub review_id: String,
    pub body: String,
    #[serde(default)]
    pub metadata: ReviewMetadata,
}

/// 任意のメタデータ。採点には使わず、保存と表示のためだけに引き回す。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playtime_minutes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weighted_vote_score: Option<f64>,
}

/// 正規化済みテキスト。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedText {
    text: String,
    is_empty: bool,
}

impl NormalizedText {
    pub(crate) fn new(text: String) -> Self {
        let is_empty = !text.chars().any(|c| !c.is_whitespace());
        Self { text, is_empty }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.is_empty
    }

    #[must_use]
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// 言語ゲートが除外した理由。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    NonTargetLanguage,
    Empty,
    None,
}

impl FilterReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonTargetLanguage => "non_target_language",
            Self::Empty => "empty",
            Self::None => "none",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "non_target_language" => Some(Self::NonTargetLanguage),
            "empty" => Some(Self::Empty),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// 言語ゲートの判定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum LanguageVerdict {
    Accepted,
    Filtered(FilterReason),
}

impl LanguageVerdict {
    #[must_use]
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }

    #[must_use]
    pub fn reason(self) -> FilterReason {
        match self {
            Self::Accepted => FilterReason::None,
            Self::Filtered(reason) => reason,
        }
    }

    #[must_use]
    pub fn status_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Filtered(_) => "filtered",
        }
    }
}

/// 両スコアラー共通の3値ラベル。4つ目の値は存在しない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub const ALL: [Self; 3] = [Self::Negative, Self::Neutral, Self::Positive];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "Positive",
            Self::Neutral => "Neutral",
            Self::Negative => "Negative",
        }
    }

    #[must_use]
    pub fn is_polar(self) -> bool {
        !matches!(self, Self::Neutral)
    }

    /// 極性の符号（Neutralは0）。
    #[must_use]
    pub fn sign(self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Neutral => 0.0,
            Self::Negative => -1.0,
        }
    }

    /// `Positive`/`neutral`/`NEGATIVE` のような表記揺れを許容してパースする。
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "positive" | "pos" => Some(Self::Positive),
            "neutral" | "neu" => Some(Self::Neutral),
            "negative" | "neg" => Some(Self::Negative),
            _ => None,
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 下流の診断用に付与する補足情報。コアフィールドではない。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreNotes {
    /// 先頭切り詰めを行った場合の元トークン数。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated_tokens: Option<usize>,
    /// スコアに寄与したスラング上書き語と、その調整後の寄与値。
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slang_terms: Vec<SlangContribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlangContribution {
    pub term: String,
    pub contribution: f64,
}

/// 1つのスコアラーが出す結果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub label: SentimentLabel,
    pub confidence: f64,
    pub raw_score: f64,
    #[serde(default)]
    pub notes: ScoreNotes,
}

impl ScoreResult {
    #[must_use]
    pub fn new(label: SentimentLabel, confidence: f64, raw_score: f64) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            raw_score,
            notes: ScoreNotes::default(),
        }
    }

    #[must_use]
    pub fn with_notes(mut self, notes: ScoreNotes) -> Self {
        self.notes = notes;
        self
    }
}

/// スコアラーの呼び出し結果。バックエンド障害時はラベルを捏造せず`Unavailable`を返す。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScorerOutcome {
    Scored(ScoreResult),
    Unavailable { reason: String },
}

impl ScorerOutcome {
    #[must_use]
    pub fn result(&self) -> Option<&ScoreResult> {
        match self {
            Self::Scored(result) => Some(result),
            Self::Unavailable { .. } => None,
        }
    }
}

/// 2系統のラベル照合結果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agreement {
    Agree,
    Disagree,
    Indeterminate,
}

impl Agreement {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Agree => "agree",
            Self::Disagree => "disagree",
            Self::Indeterminate => "indeterminate",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "agree" => Some(Self::Agree),
            "disagree" => Some(Self::Disagree),
            "indeterminate" => Some(Self::Indeterminate),
            _ => None,
        }
    }
}

/// 不一致の原因分類（助言的メタデータ）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisagreementKind {
    BoundaryAmbiguous,
    SlangDriven,
    ContextDivergence,
}

impl DisagreementKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BoundaryAmbiguous => "boundary_ambiguous",
            Self::SlangDriven => "slang_driven",
            Self::ContextDivergence => "context_divergence",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "boundary_ambiguous" => Some(Self::BoundaryAmbiguous),
            "slang_driven" => Some(Self::SlangDriven),
            "context_divergence" => Some(Self::ContextDivergence),
            _ => None,
        }
    }
}

/// 保存・表示の単位。`review_id`が自然キー。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredReview {
    pub review_id: String,
    pub normalized_text: String,
    pub language_verdict: LanguageVerdict,
    pub lexicon_result: Option<ScorerOutcome>,
    pub context_result: Option<ScorerOutcome>,
    pub agreement: Option<Agreement>,
    pub disagreement_kind: Option<DisagreementKind>,
    pub metadata: ReviewMetadata,
    pub engine_version: String,
    pub text_hash: u64,
    pub scored_at: DateTime<Utc>,
}

impl ScoredReview {
    /// 表示用のステータス（filtered/agree/disagree/indeterminate）。
    #[must_use]
    pub fn status(&self) -> &'static str {
        match (self.language_verdict, self.agreement) {
            (LanguageVerdict::Filtered(_), _) => "filtered",
            (LanguageVerdict::Accepted, Some(agreement)) => agreement.as_str(),
            (LanguageVerdict::Accepted, None) => "indeterminate",
        }
    }
}

/// バッチ1回分の集計。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub scored: usize,
    pub filtered: usize,
    pub indeterminate: usize,
    pub failed: usize,
    pub disagreements: BTreeMap<DisagreementKind, usize>,
    pub cancelled: bool,
}

impl BatchReport {
    #[must_use]
    pub fn new(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.scored + self.filtered + self.indeterminate + self.failed
    }

    pub(crate) fn record(&mut self, review: &ScoredReview) {
        match (review.language_verdict, review.agreement) {
            (LanguageVerdict::Filtered(_), _) => self.filtered += 1,
            (_, Some(Agreement::Indeterminate) | None) => self.indeterminate += 1,
            (_, Some(Agreement::Agree | Agreement::Disagree)) => {
                self.scored += 1;
                if let Some(kind) = review.disagreement_kind {
                    *self.disagreements.entry(kind).or_insert(0) += 1;
                }
            }
        }
    }
}
