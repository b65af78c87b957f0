//! 不一致レビューの原因分類。
use crate::review::{DisagreementKind, ScoreResult, SentimentLabel};

/// 不一致の原因を上から順に判定する。
///
/// 1. 片側だけがNeutral → `BoundaryAmbiguous`
/// 2. 辞書側が極性を持ち、そのラベル方向に寄与したスラング語がある → `SlangDriven`
/// 3. それ以外 → `ContextDivergence`
#[must_use]
pub fn classify(lexicon: &ScoreResult, context: &ScoreResult) -> DisagreementKind {
    let lex_neutral = lexicon.label == SentimentLabel::Neutral;
    let ctx_neutral = context.label == SentimentLabel::Neutral;
    if lex_neutral != ctx_neutral {
        return DisagreementKind::BoundaryAmbiguous;
    }

    if lexicon.label.is_polar() && lexicon.label != context.label {
        let direction = lexicon.label.sign();
        let slang_pushed = lexicon
            .notes
            .slang_terms
            .iter()
            .any(|slang| slang.contribution * direction > 0.0);
        if slang_pushed {
            return DisagreementKind::SlangDriven;
        }
    }

    DisagreementKind::ContextDivergence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{ScoreNotes, SlangContribution};
    use rstest::rstest;

    fn result(label: SentimentLabel, slang: &[(&str, f64)]) -> ScoreResult {
        ScoreResult::new(label, 0.5, label.sign()).with_notes(ScoreNotes {
            truncated_tokens: None,
            slang_terms: slang
                .iter()
                .map(|(term, contribution)| SlangContribution {
                    term: (*term).to_string(),
                    contribution: *contribution,
                })
                .collect(),
        })
    }

    #[rstest]
    #[case(SentimentLabel::Neutral, SentimentLabel::Positive)]
    #[case(SentimentLabel::Negative, SentimentLabel::Neutral)]
    fn one_neutral_side_is_boundary(#[case] lex: SentimentLabel, #[case] ctx: SentimentLabel) {
        let kind = classify(&result(lex, &[("peak", 0.8)]), &result(ctx, &[]));
        assert_eq!(kind, DisagreementKind::BoundaryAmbiguous);
    }

    #[test]
    fn slang_in_label_direction_is_slang_driven() {
        let kind = classify(
            &result(SentimentLabel::Positive, &[("mid", -0.3), ("peak", 0.8)]),
            &result(SentimentLabel::Negative, &[]),
        );
        assert_eq!(kind, DisagreementKind::SlangDriven);
    }

    #[test]
    fn slang_against_label_direction_is_divergence() {
        let kind = classify(
            &result(SentimentLabel::Positive, &[("mid", -0.3)]),
            &result(SentimentLabel::Negative, &[]),
        );
        assert_eq!(kind, DisagreementKind::ContextDivergence);
    }

    #[test]
    fn no_slang_is_divergence() {
        let kind = classify(
            &result(SentimentLabel::Negative, &[]),
            &result(SentimentLabel::Positive, &[]),
        );
        assert_eq!(kind, DisagreementKind::ContextDivergence);
    }
}
