//! 2系統のスコアを照合して`ScoredReview`を組み立てる。
//!
//! 純粋関数。モデルの種類では分岐せず、共有ラベル空間の値だけを比較する。
use chrono::{DateTime, Utc};
use xxhash_rust::xxh3::xxh3_64;

use crate::disagreement;
use crate::error::EngineError;
use crate::review::{
    Agreement, LanguageVerdict, NormalizedText, RawReview, ScoredReview, ScorerOutcome,
};

/// 照合に渡す1レビュー分の材料。
#[derive(Debug)]
pub struct ReconcileInput<'a> {
    pub review: &'a RawReview,
    pub normalized: &'a NormalizedText,
    pub verdict: LanguageVerdict,
    pub lexicon: Option<ScorerOutcome>,
    pub context: Option<ScorerOutcome>,
}

/// 正規化テキストのxxh3ハッシュ。
#[must_use]
pub fn hash_text(text: &str) -> u64 {
    xxh3_64(text.as_bytes())
}

/// 照合して保存単位のレコードを作る。
///
/// # Errors
/// 受理済みなのに片方の結果が欠けている、または除外済みなのに結果を
/// 持っている場合は [`EngineError::ContractViolation`]。
pub fn reconcile(
    input: ReconcileInput<'_>,
    engine_version: &str,
    scored_at: DateTime<Utc>,
) -> Result<ScoredReview, EngineError> {
    let ReconcileInput {
        review,
        normalized,
        verdict,
        lexicon,
        context,
    } = input;

    let (lexicon, context, agreement, disagreement_kind) = match verdict {
        LanguageVerdict::Filtered(_) => {
            if lexicon.is_some() || context.is_some() {
                return Err(EngineError::contract(format!(
                    "filtered review {} carries scorer output",
                    review.review_id
                )));
            }
            (None, None, None, None)
        }
        LanguageVerdict::Accepted => {
            let (Some(lexicon), Some(context)) = (lexicon, context) else {
                return Err(EngineError::contract(format!(
                    "accepted review {} is missing a scorer outcome",
                    review.review_id
                )));
            };
            let (agreement, kind) = match (lexicon.result(), context.result()) {
                (Some(lex), Some(ctx)) if lex.label == ctx.label => (Agreement::Agree, None),
                (Some(lex), Some(ctx)) => {
                    (Agreement::Disagree, Some(disagreement::classify(lex, ctx)))
                }
                _ => (Agreement::Indeterminate, None),
            };
            (Some(lexicon), Some(context), Some(agreement), kind)
        }
    };

    Ok(ScoredReview {
        review_id: review.review_id.trim().to_string(),
        normalized_text: normalized.as_str().to_string(),
        language_verdict: verdict,
        lexicon_result: lexicon,
        context_result: context,
        agreement,
        disagreement_kind,
        metadata: review.metadata.clone(),
        engine_version: engine_version.to_string(),
        text_hash: hash_text(normalized.as_str()),
        scored_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::review::{
        DisagreementKind, FilterReason, ReviewMetadata, ScoreResult, SentimentLabel,
    };

    fn raw(body: &str) -> RawReview {
        RawReview {
            review_id: "42".into(),
            body: body.into(),
            metadata: ReviewMetadata::default(),
        }
    }

    fn scored(label: SentimentLabel, confidence: f64) -> ScorerOutcome {
        ScorerOutcome::Scored(ScoreResult::new(label, confidence, label.sign()))
    }

    fn run(
        verdict: LanguageVerdict,
        lexicon: Option<ScorerOutcome>,
        context: Option<ScorerOutcome>,
    ) -> Result<ScoredReview, EngineError> {
        let review = raw("fun game");
        let normalized = normalize(&review.body);
        reconcile(
            ReconcileInput {
                review: &review,
                normalized: &normalized,
                verdict,
                lexicon,
                context,
            },
            "hybrid_v2",
            Utc::now(),
        )
    }

    #[test]
    fn equal_labels_agree_regardless_of_confidence() {
        let review = run(
            LanguageVerdict::Accepted,
            Some(scored(SentimentLabel::Positive, 0.1)),
            Some(scored(SentimentLabel::Positive, 0.99)),
        )
        .expect("reconciled");
        assert_eq!(review.agreement, Some(Agreement::Agree));
        assert_eq!(review.disagreement_kind, None);
        assert_eq!(review.engine_version, "hybrid_v2");
        assert_eq!(review.text_hash, hash_text("fun game"));
    }

    #[test]
    fn different_labels_disagree_with_kind() {
        let review = run(
            LanguageVerdict::Accepted,
            Some(scored(SentimentLabel::Positive, 0.9)),
            Some(scored(SentimentLabel::Negative, 0.9)),
        )
        .expect("reconciled");
        assert_eq!(review.agreement, Some(Agreement::Disagree));
        assert_eq!(
            review.disagreement_kind,
            Some(DisagreementKind::ContextDivergence)
        );
    }

    #[test]
    fn agreement_is_symmetric() {
        for lex in SentimentLabel::ALL {
            for ctx in SentimentLabel::ALL {
                let forward = run(
                    LanguageVerdict::Accepted,
                    Some(scored(lex, 0.5)),
                    Some(scored(ctx, 0.5)),
                )
                .expect("forward");
                let backward = run(
                    LanguageVerdict::Accepted,
                    Some(scored(ctx, 0.5)),
                    Some(scored(lex, 0.5)),
                )
                .expect("backward");
                assert_eq!(forward.agreement, backward.agreement);
            }
        }
    }

    #[test]
    fn unavailable_outcome_is_indeterminate() {
        let review = run(
            LanguageVerdict::Accepted,
            Some(scored(SentimentLabel::Positive, 0.9)),
            Some(ScorerOutcome::Unavailable {
                reason: "timed out".into(),
            }),
        )
        .expect("reconciled");
        assert_eq!(review.agreement, Some(Agreement::Indeterminate));
        assert_eq!(review.status(), "indeterminate");
    }

    #[test]
    fn filtered_review_has_no_scores() {
        let review = run(
            LanguageVerdict::Filtered(FilterReason::Empty),
            None,
            None,
        )
        .expect("reconciled");
        assert!(review.lexicon_result.is_none());
        assert!(review.context_result.is_none());
        assert!(review.agreement.is_none());
        assert_eq!(review.status(), "filtered");
    }

    #[test]
    fn filtered_review_with_scores_is_contract_violation() {
        let error = run(
            LanguageVerdict::Filtered(FilterReason::NonTargetLanguage),
            Some(scored(SentimentLabel::Neutral, 0.3)),
            None,
        )
        .expect_err("contract violation");
        assert!(error.is_fatal());
    }

    #[test]
    fn accepted_review_missing_outcome_is_contract_violation() {
        let error = run(
            LanguageVerdict::Accepted,
            Some(scored(SentimentLabel::Neutral, 0.3)),
            None,
        )
        .expect_err("contract violation");
        assert!(error.is_fatal());
    }
}
