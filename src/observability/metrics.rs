/// Prometheusメトリクス定義。
use prometheus::{
    Counter, Gauge, Histogram, Registry, register_counter_with_registry,
    register_gauge_with_registry, register_histogram_with_registry,
};
use std::sync::Arc;

use crate::review::{Agreement, DisagreementKind, LanguageVerdict, ScoredReview};

/// メトリクスコレクター。
#[derive(Debug, Clone)]
pub struct Metrics {
    // カウンター
    pub reviews_received: Counter,
    pub reviews_agree: Counter,
    pub reviews_disagree: Counter,
    pub reviews_filtered: Counter,
    pub reviews_indeterminate: Counter,
    pub reviews_failed: Counter,
    pub disagreements_boundary_ambiguous: Counter,
    pub disagreements_slang_driven: Counter,
    pub disagreements_context_divergence: Counter,
    pub context_unavailable: Counter,
    pub contract_violations: Counter,
    pub batches_completed: Counter,
    pub batches_cancelled: Counter,
    pub batches_aborted: Counter,

    // ヒストグラム
    pub context_latency: Histogram,
    pub review_duration: Histogram,
    pub batch_duration: Histogram,

    // ゲージ
    pub reviews_in_flight: Gauge,
}

impl Metrics {
    /// 新しいメトリクスコレクターを作成する。
    #[allow(clippy::too_many_lines)]
    pub fn new(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        Ok(Self {
            reviews_received: register_counter_with_registry!(
                "review_sentiment_reviews_received_total",
                "Total number of reviews submitted for scoring",
                registry
            )?,
            reviews_agree: register_counter_with_registry!(
                "review_sentiment_reviews_agree_total",
                "Reviews where lexicon and context labels matched",
                registry
            )?,
            reviews_disagree: register_counter_with_registry!(
                "review_sentiment_reviews_disagree_total",
                "Reviews where lexicon and context labels differed",
                registry
            )?,
            reviews_filtered: register_counter_with_registry!(
                "review_sentiment_reviews_filtered_total",
                "Reviews filtered by the language gate",
                registry
            )?,
            reviews_indeterminate: register_counter_with_registry!(
                "review_sentiment_reviews_indeterminate_total",
                "Reviews whose agreement could not be determined",
                registry
            )?,
            reviews_failed: register_counter_with_registry!(
                "review_sentiment_reviews_failed_total",
                "Reviews skipped because of malformed input or store errors",
                registry
            )?,
            disagreements_boundary_ambiguous: register_counter_with_registry!(
                "review_sentiment_disagreements_boundary_ambiguous_total",
                "Disagreements where exactly one scorer returned Neutral",
                registry
            )?,
            disagreements_slang_driven: register_counter_with_registry!(
                "review_sentiment_disagreements_slang_driven_total",
                "Disagreements driven by domain slang overrides",
                registry
            )?,
            disagreements_context_divergence: register_counter_with_registry!(
                "review_sentiment_disagreements_context_divergence_total",
                "Disagreements attributed to contextual interpretation",
                registry
            )?,
            context_unavailable: register_counter_with_registry!(
                "review_sentiment_context_unavailable_total",
                "Context model calls that failed or timed out",
                registry
            )?,
            contract_violations: register_counter_with_registry!(
                "review_sentiment_contract_violations_total",
                "Label space contract violations that aborted a batch",
                registry
            )?,
            batches_completed: register_counter_with_registry!(
                "review_sentiment_batches_completed_total",
                "Total number of batches completed",
                registry
            )?,
            batches_cancelled: register_counter_with_registry!(
                "review_sentiment_batches_cancelled_total",
                "Total number of batches cancelled before completion",
                registry
            )?,
            batches_aborted: register_counter_with_registry!(
                "review_sentiment_batches_aborted_total",
                "Total number of batches aborted by a fatal error",
                registry
            )?,
            context_latency: register_histogram_with_registry!(
                "review_sentiment_context_latency_seconds",
                "Latency of context model inference per review",
                registry
            )?,
            review_duration: register_histogram_with_registry!(
                "review_sentiment_review_duration_seconds",
                "Duration of the full per-review pipeline",
                registry
            )?,
            batch_duration: register_histogram_with_registry!(
                "review_sentiment_batch_duration_seconds",
                "Duration of entire batch processing",
                registry
            )?,
            reviews_in_flight: register_gauge_with_registry!(
                "review_sentiment_reviews_in_flight",
                "Number of reviews currently being scored",
                registry
            )?,
        })
    }

    /// 照合済みレビュー1件分のカウンターを進める。
    pub fn record_review(&self, review: &ScoredReview) {
        match (review.language_verdict, review.agreement) {
            (LanguageVerdict::Filtered(_), _) => self.reviews_filtered.inc(),
            (_, Some(Agreement::Agree)) => self.reviews_agree.inc(),
            (_, Some(Agreement::Disagree)) => self.reviews_disagree.inc(),
            (_, Some(Agreement::Indeterminate) | None) => self.reviews_indeterminate.inc(),
        }
        match review.disagreement_kind {
            Some(DisagreementKind::BoundaryAmbiguous) => {
                self.disagreements_boundary_ambiguous.inc();
            }
            Some(DisagreementKind::SlangDriven) => self.disagreements_slang_driven.inc(),
            Some(DisagreementKind::ContextDivergence) => {
                self.disagreements_context_divergence.inc();
            }
            None => {}
        }
        let context_unavailable = review
            .context_result
            .as_ref()
            .is_some_and(|outcome| outcome.result().is_none());
        if context_unavailable {
            self.context_unavailable.inc();
        }
    }
}
