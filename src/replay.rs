use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::context::{
    ContextModel, ContextScorer, ContextSettings, LabelAdapter, RustBertSentimentModel,
    UnavailableContextModel,
};
use crate::engine::{BatchRunner, EngineContext};
use crate::ingest;
use crate::language_detection::{GateSettings, LanguageGate};
use crate::lexicon::{Lexicon, LexiconOverrides, LexiconScorer, LexiconSettings};
use crate::review::{Agreement, BatchReport, ScoredReview, SentimentLabel};
use crate::store::MemoryReviewStore;

/// Configuration required by the offline replay helper.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub dataset: PathBuf,
    pub app_id: Option<u64>,
    pub lexicon_overrides: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub gate: GateSettings,
    pub min_relative_distance: f64,
    pub lexicon: LexiconSettings,
    pub context: ContextSettings,
    pub label_adapter: LabelAdapter,
    pub engine_version: String,
}

impl ReplayConfig {
    /// 組み込みの既定値で構成する。環境変数は読まない。
    #[must_use]
    pub fn new(dataset: PathBuf) -> Self {
        Self {
            dataset,
            app_id: None,
            lexicon_overrides: None,
            model_dir: None,
            gate: GateSettings {
                target_language: "en".to_string(),
                slang_allowlist: ["gg", "gj", "ggwp", "wp", "ez", "goty"]
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
                min_chars: 3,
            },
            min_relative_distance: 0.0,
            lexicon: LexiconSettings::default(),
            context: ContextSettings::default(),
            label_adapter: LabelAdapter::default(),
            engine_version: "hybrid_v2".to_string(),
        }
    }

    /// サーバーと同じ`REVIEW_*`設定から構成する。
    #[must_use]
    pub fn from_config(dataset: PathBuf, config: &Config) -> Self {
        Self {
            dataset,
            app_id: None,
            lexicon_overrides: config.lexicon_overrides_path().map(Path::to_path_buf),
            model_dir: config.context_model_dir().map(Path::to_path_buf),
            gate: config.gate_settings(),
            min_relative_distance: config.lang_min_relative_distance(),
            lexicon: config.lexicon_settings(),
            context: config.context_settings(),
            label_adapter: config.label_adapter(),
            engine_version: config.engine_version().to_string(),
        }
    }
}

/// リプレイ1回分の結果。
#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub report: BatchReport,
    pub context_model: String,
    pub elapsed_ms: u64,
    /// `lexicon→context`のラベル組ごとの不一致件数。
    pub confusion: BTreeMap<String, usize>,
    pub samples: Vec<DisagreementSample>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DisagreementSample {
    pub review_id: String,
    pub kind: Option<String>,
    pub lexicon: SentimentLabel,
    pub context: SentimentLabel,
    pub excerpt: String,
}

const SAMPLE_LIMIT: usize = 20;
const EXCERPT_CHARS: usize = 160;

/// Replay a Steam review dump offline and summarise where the two scorers disagree.
///
/// Nothing is persisted: results stay in an in-memory store for the lifetime of the call.
///
/// # Errors
/// データセットの読み込み、辞書・ゲート・モデルの初期化、またはバッチ実行が失敗した場合。
pub async fn replay_reviews(config: ReplayConfig) -> Result<ReplaySummary> {
    let batch = ingest::load_file(&config.dataset, config.app_id)
        .with_context(|| format!("failed to load dataset at {}", config.dataset.display()))?;

    let overrides = LexiconOverrides::load(config.lexicon_overrides.as_deref())
        .context("failed to load lexicon overrides")?;
    let lexicon = Lexicon::with_bundled_base(&overrides).context("failed to build lexicon")?;
    let lexicon_scorer = LexiconScorer::new(Arc::new(lexicon), config.lexicon);

    let gate = LanguageGate::with_lingua(&config.gate, config.min_relative_distance)
        .context("failed to build language gate")?;

    let model: Arc<dyn ContextModel> = match config.model_dir.as_deref() {
        Some(dir) => Arc::new(
            RustBertSentimentModel::from_dir(dir)
                .with_context(|| format!("failed to load context model from {}", dir.display()))?,
        ),
        None => Arc::new(UnavailableContextModel),
    };
    let context_scorer = ContextScorer::new(model, config.label_adapter.clone(), config.context);
    let context_model = context_scorer.model_name().to_string();

    let engine = EngineContext::new(
        Arc::new(gate),
        Arc::new(lexicon_scorer),
        Arc::new(context_scorer),
        config.engine_version.clone(),
    )
    .context("failed to assemble engine context")?;

    let store = Arc::new(MemoryReviewStore::new());
    let runner = BatchRunner::new(Arc::new(engine), store.clone());

    let started = Instant::now();
    let batch_id = format!("replay-{}", Uuid::new_v4());
    let report = runner
        .run_ingested(batch_id, batch, CancellationToken::new())
        .await
        .context("replay batch aborted")?;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let scored = store.snapshot().await;
    let (confusion, samples) = summarise_disagreements(&scored);

    Ok(ReplaySummary {
        report,
        context_model,
        elapsed_ms,
        confusion,
        samples,
    })
}

fn summarise_disagreements(
    reviews: &[ScoredReview],
) -> (BTreeMap<String, usize>, Vec<DisagreementSample>) {
    let mut confusion = BTreeMap::new();
    let mut samples = Vec::new();

    for review in reviews {
        if review.agreement != Some(Agreement::Disagree) {
            continue;
        }
        let (Some(lexicon), Some(context)) = (
            review.lexicon_result.as_ref().and_then(|o| o.result()),
            review.context_result.as_ref().and_then(|o| o.result()),
        ) else {
            continue;
        };

        *confusion
            .entry(format!("{}->{}", lexicon.label, context.label))
            .or_insert(0) += 1;

        if samples.len() < SAMPLE_LIMIT {
            samples.push(DisagreementSample {
                review_id: review.review_id.clone(),
                kind: review.disagreement_kind.map(|kind| kind.as_str().to_string()),
                lexicon: lexicon.label,
                context: context.label,
                excerpt: review.normalized_text.chars().take(EXCERPT_CHARS).collect(),
            });
        }
    }

    (confusion, samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{
        DisagreementKind, LanguageVerdict, ReviewMetadata, ScoreResult, ScorerOutcome,
    };
    use chrono::Utc;

    fn disagreeing(id: &str, lexicon: SentimentLabel, context: SentimentLabel) -> ScoredReview {
        ScoredReview {
            review_id: id.into(),
            normalized_text: "mid game but the story carried it".into(),
            language_verdict: LanguageVerdict::Accepted,
            lexicon_result: Some(ScorerOutcome::Scored(ScoreResult::new(lexicon, 0.6, -0.4))),
            context_result: Some(ScorerOutcome::Scored(ScoreResult::new(context, 0.8, 0.7))),
            agreement: Some(Agreement::Disagree),
            disagreement_kind: Some(DisagreementKind::ContextDivergence),
            metadata: ReviewMetadata::default(),
            engine_version: "hybrid_v2".into(),
            text_hash: 0,
            scored_at: Utc::now(),
        }
    }

    #[test]
    fn summary_counts_label_pairs_for_disagreements_only() {
        let mut agreeing = disagreeing("3", SentimentLabel::Positive, SentimentLabel::Positive);
        agreeing.agreement = Some(Agreement::Agree);
        agreeing.disagreement_kind = None;

        let reviews = vec![
            disagreeing("1", SentimentLabel::Negative, SentimentLabel::Positive),
            disagreeing("2", SentimentLabel::Negative, SentimentLabel::Positive),
            agreeing,
        ];

        let (confusion, samples) = summarise_disagreements(&reviews);

        assert_eq!(confusion.get("Negative->Positive"), Some(&2));
        assert_eq!(confusion.len(), 1);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].kind.as_deref(), Some("context_divergence"));
    }

    #[tokio::test]
    async fn replay_without_model_marks_accepted_reviews_indeterminate() {
        let mut dataset = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(
            &mut dataset,
            br#"{"success": 1, "reviews": [
                {"recommendationid": "1", "review": "This game is absolutely wonderful and I love the music."},
                {"recommendationid": "2", "review": ""},
                {"review": "missing id"}
            ]}"#,
        )
        .expect("write dataset");

        let summary = replay_reviews(ReplayConfig::new(dataset.path().to_path_buf()))
            .await
            .expect("replay succeeds");

        assert_eq!(summary.context_model, "unavailable");
        assert_eq!(summary.report.indeterminate, 1);
        assert_eq!(summary.report.filtered, 1);
        assert_eq!(summary.report.failed, 1);
        assert!(summary.confusion.is_empty());
    }

    #[tokio::test]
    async fn replay_applies_configured_gate_settings() {
        let mut dataset = tempfile::NamedTempFile::new().expect("temp file");
        std::io::Write::write_all(
            &mut dataset,
            br#"[{"recommendationid": "1", "review": "This game is absolutely wonderful and I love the music."}]"#,
        )
        .expect("write dataset");

        let mut config = ReplayConfig::new(dataset.path().to_path_buf());
        config.gate.min_chars = 500;

        let summary = replay_reviews(config).await.expect("replay succeeds");

        assert_eq!(summary.report.filtered, 1);
        assert_eq!(summary.report.indeterminate, 0);
    }

    #[test]
    fn from_config_reads_review_environment() {
        use crate::config::{ENV_MUTEX, reset_env};

        let _lock = ENV_MUTEX.lock().expect("env mutex");
        reset_env();
        // SAFETY: guarded by ENV_MUTEX and reset below.
        unsafe {
            std::env::set_var("REVIEW_LANG_MIN_CHARS", "8");
            std::env::set_var("REVIEW_LANG_MIN_RELATIVE_DISTANCE", "0.25");
            std::env::set_var("REVIEW_SCORE_THRESHOLD", "0.2");
            std::env::set_var("REVIEW_CONTEXT_WORKERS", "2");
            std::env::set_var("REVIEW_CONTEXT_TIMEOUT_MS", "250");
            std::env::set_var("REVIEW_ENGINE_VERSION", "replay_v3");
        }

        let loaded = Config::from_env().expect("config loads");
        let config = ReplayConfig::from_config(PathBuf::from("reviews.json"), &loaded);
        reset_env();

        assert_eq!(config.gate.min_chars, 8);
        assert!((config.min_relative_distance - 0.25).abs() < f64::EPSILON);
        assert!((config.lexicon.threshold - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.context.workers, 2);
        assert_eq!(config.context.timeout, std::time::Duration::from_millis(250));
        assert_eq!(config.engine_version, "replay_v3");
        assert!(config.model_dir.is_none());
    }
}
