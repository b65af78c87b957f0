use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use review_sentiment_worker::context::{
    ContextModel, ContextScorer, ContextSettings, LabelAdapter, NativeClass,
};
use review_sentiment_worker::engine::{BatchRunner, EngineContext};
use review_sentiment_worker::ingest;
use review_sentiment_worker::language_detection::{GateSettings, LanguageDetection, LanguageGate};
use review_sentiment_worker::lexicon::{Lexicon, LexiconOverrides, LexiconScorer, LexiconSettings};
use review_sentiment_worker::normalize::normalize;
use review_sentiment_worker::reconcile::{ReconcileInput, reconcile};
use review_sentiment_worker::review::{
    Agreement, DisagreementKind, FilterReason, LanguageVerdict, RawReview, ReviewMetadata,
    ScoreResult, ScorerOutcome, SentimentLabel,
};
use review_sentiment_worker::store::{MemoryReviewStore, ReviewStore};

/// 何でも英語と判定する検出器。ゲートの除外はemptyのみになる。
struct AlwaysEnglish;

impl LanguageDetection for AlwaysEnglish {
    fn detect(&self, _text: &str) -> Option<String> {
        Some("en".into())
    }
}

/// 本文のキーワードで振る舞いを切り替えるモデル。
#[derive(Default)]
struct ScriptedModel {
    calls: AtomicUsize,
}

#[async_trait]
impl ContextModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn classify(&self, text: &str) -> Result<Vec<NativeClass>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("stall") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if text.contains("waste") {
            return Ok(vec![
                NativeClass::new("negative", 0.7),
                NativeClass::new("neutral", 0.2),
                NativeClass::new("positive", 0.1),
            ]);
        }
        Ok(vec![
            NativeClass::new("negative", 0.05),
            NativeClass::new("neutral", 0.15),
            NativeClass::new("positive", 0.8),
        ])
    }
}

/// 同時に走っている`classify`の最大数を記録するモデル。
#[derive(Default)]
struct PeakTrackingModel {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ContextModel for PeakTrackingModel {
    fn name(&self) -> &str {
        "peak-tracking"
    }

    async fn classify(&self, _text: &str) -> Result<Vec<NativeClass>> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![NativeClass::new("positive", 0.9)])
    }
}

struct Harness {
    runner: BatchRunner,
    store: Arc<MemoryReviewStore>,
    model: Arc<ScriptedModel>,
}

fn harness(context_timeout: Duration) -> Harness {
    let model = Arc::new(ScriptedModel::default());
    let (runner, store) = runner_with(
        model.clone(),
        ContextSettings {
            workers: 4,
            timeout: context_timeout,
            max_input_tokens: 512,
        },
    );
    Harness {
        runner,
        store,
        model,
    }
}

fn runner_with(
    model: Arc<dyn ContextModel>,
    settings: ContextSettings,
) -> (BatchRunner, Arc<MemoryReviewStore>) {
    let overrides = LexiconOverrides {
        terms: BTreeMap::from([("peak".to_string(), 0.8), ("mid".to_string(), -0.3)]),
    };
    let lexicon = Lexicon::with_bundled_base(&overrides).expect("lexicon builds");
    let lexicon_scorer = LexiconScorer::new(Arc::new(lexicon), LexiconSettings::default());

    let context_scorer = ContextScorer::new(model, LabelAdapter::default(), settings);

    let gate = LanguageGate::new(
        &GateSettings {
            target_language: "en".into(),
            slang_allowlist: vec!["gg".into()],
            min_chars: 3,
        },
        Box::new(AlwaysEnglish),
    );

    let engine = EngineContext::new(
        Arc::new(gate),
        Arc::new(lexicon_scorer),
        Arc::new(context_scorer),
        "hybrid_v2",
    )
    .expect("engine assembles");

    let store = Arc::new(MemoryReviewStore::new());
    let runner = BatchRunner::new(Arc::new(engine), store.clone());
    (runner, store)
}

fn review(id: &str, body: &str) -> RawReview {
    RawReview {
        review_id: id.into(),
        body: body.into(),
        metadata: ReviewMetadata {
            app_id: Some(1_245_620),
            ..ReviewMetadata::default()
        },
    }
}

fn lexicon_label(outcome: Option<&ScorerOutcome>) -> Option<SentimentLabel> {
    outcome.and_then(ScorerOutcome::result).map(|result| result.label)
}

#[tokio::test]
async fn slang_praise_is_scored_positive_and_agrees_with_context() {
    let h = harness(Duration::from_secs(5));

    let scored = h
        .runner
        .engine()
        .score_review(&review("a", "Peak gameplay, totally worth it"))
        .await
        .expect("scored");

    let lexicon = scored
        .lexicon_result
        .as_ref()
        .and_then(ScorerOutcome::result)
        .expect("lexicon scored");
    assert_eq!(lexicon.label, SentimentLabel::Positive);
    assert!(lexicon.raw_score > 0.0);
    assert!(lexicon.notes.slang_terms.iter().any(|slang| slang.term == "peak"));
    assert_eq!(scored.agreement, Some(Agreement::Agree));
    assert_eq!(scored.disagreement_kind, None);
}

#[tokio::test]
async fn empty_body_is_filtered_without_reaching_either_scorer() {
    let h = harness(Duration::from_secs(5));

    let scored = h
        .runner
        .engine()
        .score_review(&review("b", ""))
        .await
        .expect("scored");

    assert_eq!(
        scored.language_verdict,
        LanguageVerdict::Filtered(FilterReason::Empty)
    );
    assert!(scored.lexicon_result.is_none());
    assert!(scored.context_result.is_none());
    assert!(scored.agreement.is_none());
    assert_eq!(h.model.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn slang_pushing_lexicon_against_context_is_slang_driven() {
    let h = harness(Duration::from_secs(5));

    let scored = h
        .runner
        .engine()
        .score_review(&review("c", "Mid at best, kind of a waste of peak hours"))
        .await
        .expect("scored");

    assert_eq!(
        lexicon_label(scored.lexicon_result.as_ref()),
        Some(SentimentLabel::Positive)
    );
    let context = scored
        .context_result
        .as_ref()
        .and_then(ScorerOutcome::result)
        .expect("context scored");
    assert_eq!(context.label, SentimentLabel::Negative);
    assert!((context.confidence - 0.7).abs() < 1e-9);
    assert_eq!(scored.agreement, Some(Agreement::Disagree));
    assert_eq!(scored.disagreement_kind, Some(DisagreementKind::SlangDriven));
}

#[tokio::test]
async fn context_timeout_is_indeterminate_and_batch_still_completes() {
    let h = harness(Duration::from_millis(50));

    let report = h
        .runner
        .run(
            "batch-d",
            vec![
                review("d1", "the servers stall every evening"),
                review("d2", "Peak gameplay, totally worth it"),
                review("d3", ""),
            ],
            CancellationToken::new(),
        )
        .await
        .expect("batch completes");

    assert_eq!(report.indeterminate, 1);
    assert_eq!(report.scored, 1);
    assert_eq!(report.filtered, 1);
    assert_eq!(report.failed, 0);
    assert!(!report.cancelled);

    let stalled = h.store.get("d1").await.expect("store").expect("persisted");
    assert_eq!(stalled.agreement, Some(Agreement::Indeterminate));
    assert!(matches!(
        stalled.context_result,
        Some(ScorerOutcome::Unavailable { .. })
    ));
    assert!(stalled.disagreement_kind.is_none());
}

#[tokio::test]
async fn context_worker_limit_bounds_concurrent_inference() {
    let model = Arc::new(PeakTrackingModel::default());
    let (runner, store) = runner_with(
        model.clone(),
        ContextSettings {
            workers: 2,
            timeout: Duration::from_secs(5),
            max_input_tokens: 512,
        },
    );

    let batch = (0..8)
        .map(|idx| review(&format!("w{idx}"), "Great soundtrack and a fun co-op campaign"))
        .collect();
    let report = runner
        .run("batch-workers", batch, CancellationToken::new())
        .await
        .expect("batch completes");

    assert_eq!(report.scored, 8);
    assert_eq!(store.len().await, 8);
    let peak = model.peak.load(Ordering::SeqCst);
    assert!(peak >= 1);
    assert!(peak <= 2, "peak concurrency {peak} exceeded the worker limit");
}

#[tokio::test]
async fn rescoring_the_same_review_replaces_the_stored_record() {
    let h = harness(Duration::from_secs(5));
    let batch = vec![review("r1", "great soundtrack"), review("r2", "")];

    let first = h
        .runner
        .run("first", batch.clone(), CancellationToken::new())
        .await
        .expect("first run");
    let before = h.store.get("r1").await.expect("store").expect("persisted");

    let second = h
        .runner
        .run("second", batch, CancellationToken::new())
        .await
        .expect("second run");
    let after = h.store.get("r1").await.expect("store").expect("persisted");

    assert_eq!(first.total(), second.total());
    assert_eq!(h.store.len().await, 2);
    assert_eq!(before.text_hash, after.text_hash);
    assert_eq!(before.lexicon_result, after.lexicon_result);
    assert_eq!(before.agreement, after.agreement);
    assert!(after.scored_at >= before.scored_at);
}

#[test]
fn agreement_does_not_depend_on_which_side_is_which() {
    let raw = review("s", "solid but short");
    let normalized = normalize(&raw.body);
    let scored = |label: SentimentLabel| {
        Some(ScorerOutcome::Scored(ScoreResult::new(label, 0.6, label.sign())))
    };

    for (left, right) in [
        (SentimentLabel::Positive, SentimentLabel::Negative),
        (SentimentLabel::Neutral, SentimentLabel::Positive),
        (SentimentLabel::Negative, SentimentLabel::Negative),
    ] {
        let forward = reconcile(
            ReconcileInput {
                review: &raw,
                normalized: &normalized,
                verdict: LanguageVerdict::Accepted,
                lexicon: scored(left),
                context: scored(right),
            },
            "hybrid_v2",
            Utc::now(),
        )
        .expect("reconciled");
        let backward = reconcile(
            ReconcileInput {
                review: &raw,
                normalized: &normalized,
                verdict: LanguageVerdict::Accepted,
                lexicon: scored(right),
                context: scored(left),
            },
            "hybrid_v2",
            Utc::now(),
        )
        .expect("reconciled");

        assert_eq!(forward.agreement, backward.agreement);
    }
}

#[tokio::test]
async fn cancelled_batch_leaves_no_partial_records() {
    let h = harness(Duration::from_secs(60));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = h
        .runner
        .run(
            "batch-cancel",
            vec![
                review("x1", "queue times stall forever"),
                review("x2", "matchmaking can stall for ages"),
            ],
            cancel,
        )
        .await
        .expect("cancellation is not an error");

    assert!(report.cancelled);
    assert_eq!(report.total(), 0);
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn malformed_records_are_counted_as_failed() {
    let h = harness(Duration::from_secs(5));
    let batch = ingest::parse_str(
        r#"[
            {"recommendationid": "m1", "review": "good co-op"},
            {"recommendationid": "m2"},
            {"review": "no id here"}
        ]"#,
        Some(1_245_620),
    )
    .expect("payload parses");
    assert_eq!(batch.reviews.len(), 1);

    let report = h
        .runner
        .run_ingested("batch-m", batch, CancellationToken::new())
        .await
        .expect("batch completes");

    assert_eq!(report.failed, 2);
    assert_eq!(report.scored, 1);
    assert_eq!(h.store.len().await, 1);
}
