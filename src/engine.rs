//! 1レビュー分の採点パイプライン。
//!
//! 正規化 → 言語ゲート → {辞書, 文脈}（並行） → 照合、を順に実行する。
//! 共有資源は[`EngineContext`]にまとめて`Arc`で渡し、グローバル状態は持たない。
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use crate::error::EngineError;
use crate::language_detection::LanguageGate;
use crate::normalize::normalize;
use crate::reconcile::{ReconcileInput, reconcile};
use crate::review::{RawReview, ScoredReview};
use crate::scorer::{SentimentScorer, Technique};

pub mod batch;

pub use self::batch::BatchRunner;

/// 採点に必要な不変の共有資源。
pub struct EngineContext {
    gate: Arc<LanguageGate>,
    lexicon: Arc<dyn SentimentScorer>,
    context: Arc<dyn SentimentScorer>,
    engine_version: String,
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("gate", &self.gate)
            .field("lexicon", &self.lexicon.technique())
            .field("context", &self.context.technique())
            .field("engine_version", &self.engine_version)
            .finish()
    }
}

impl EngineContext {
    /// # Errors
    /// スコアラーの手法が取り違えられている場合は [`EngineError::ContractViolation`]。
    pub fn new(
        gate: Arc<LanguageGate>,
        lexicon: Arc<dyn SentimentScorer>,
        context: Arc<dyn SentimentScorer>,
        engine_version: impl Into<String>,
    ) -> Result<Self, EngineError> {
        if lexicon.technique() != Technique::Lexicon || context.technique() != Technique::Context {
            return Err(EngineError::contract(format!(
                "scorer slots mismatched: lexicon={}, context={}",
                lexicon.technique(),
                context.technique()
            )));
        }
        Ok(Self {
            gate,
            lexicon,
            context,
            engine_version: engine_version.into(),
        })
    }

    #[must_use]
    pub fn engine_version(&self) -> &str {
        &self.engine_version
    }

    #[must_use]
    pub fn gate(&self) -> &LanguageGate {
        &self.gate
    }

    /// 1レビューを採点して保存単位のレコードにする。
    ///
    /// 除外されたレビューはどちらのスコアラーにも渡さない。
    ///
    /// # Errors
    /// `review_id`が空なら [`EngineError::MalformedInput`]。ラベル空間の
    /// 契約違反は [`EngineError::ContractViolation`]。
    #[instrument(skip_all, fields(review_id = %review.review_id))]
    pub async fn score_review(&self, review: &RawReview) -> Result<ScoredReview, EngineError> {
        if review.review_id.trim().is_empty() {
            return Err(EngineError::MalformedInput {
                review_id: None,
                reason: "review_id is empty".into(),
            });
        }

        let normalized = normalize(&review.body);
        let verdict = self.gate.evaluate(&normalized);

        let (lexicon, context) = if verdict.is_accepted() {
            let (lexicon, context) = tokio::join!(
                self.lexicon.score(&normalized),
                self.context.score(&normalized)
            );
            (Some(lexicon?), Some(context?))
        } else {
            debug!(reason = verdict.reason().as_str(), "review filtered before scoring");
            (None, None)
        };

        reconcile(
            ReconcileInput {
                review,
                normalized: &normalized,
                verdict,
                lexicon,
                context,
            },
            &self.engine_version,
            Utc::now(),
        )
    }
}
