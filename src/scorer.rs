//! スコアラー共通インターフェース。
//!
//! 各手法はネイティブ出力を共有の[`SentimentLabel`](crate::review::SentimentLabel)に
//! 写像してから返す。照合側はモデルの種類で分岐しない。
use std::fmt;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::review::{NormalizedText, ScorerOutcome};

/// スコアリング手法。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Technique {
    Lexicon,
    Context,
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lexicon => "lexicon",
            Self::Context => "context",
        })
    }
}

#[async_trait]
pub trait SentimentScorer: Send + Sync {
    fn technique(&self) -> Technique;

    /// 受理済みテキストを採点する。
    ///
    /// バックエンド障害は`Ok(ScorerOutcome::Unavailable)`で表す。`Err`は
    /// ラベル空間の契約違反など、回復すべきでない不具合に限る。
    async fn score(&self, text: &NormalizedText) -> Result<ScorerOutcome, EngineError>;
}
