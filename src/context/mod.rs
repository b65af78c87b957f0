//! 文脈モデルによるスコアラー。
//!
//! 事前学習済みの分類モデルが返すネイティブラベルの確率分布を、
//! [`LabelAdapter`]でエンジン共通の3値ラベルへ写像する。
//! モデル呼び出しはセマフォで同時実行数を、タイムアウトで所要時間を制限し、
//! 障害・タイムアウト時はラベルを捏造せず`Unavailable`を返す。
//! タイムアウトしてもバックエンドの推論は止まらないため、許可は推論が
//! 実際に終わるまで解放しない。
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use prometheus::Histogram;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

mod bert;

pub use self::bert::RustBertSentimentModel;

use crate::error::EngineError;
use crate::review::{NormalizedText, ScoreNotes, ScoreResult, ScorerOutcome, SentimentLabel};
use crate::scorer::{SentimentScorer, Technique};

/// モデルが返す1クラス分の確率。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeClass {
    pub label: String,
    pub probability: f64,
}

impl NativeClass {
    #[must_use]
    pub fn new(label: impl Into<String>, probability: f64) -> Self {
        Self {
            label: label.into(),
            probability,
        }
    }
}

/// 文脈分類モデルのバックエンド。
#[async_trait]
pub trait ContextModel: Send + Sync {
    fn name(&self) -> &str;

    /// ネイティブラベル空間での分布を返す。argmaxのみを返す実装も許容する。
    async fn classify(&self, text: &str) -> Result<Vec<NativeClass>>;
}

/// モデル未設定時のバックエンド。常に失敗し、照合結果はIndeterminateになる。
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableContextModel;

#[async_trait]
impl ContextModel for UnavailableContextModel {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn classify(&self, _text: &str) -> Result<Vec<NativeClass>> {
        anyhow::bail!("no context model configured")
    }
}

/// ネイティブラベル → エンジンラベルの写像。
///
/// 複数のネイティブクラスが同じエンジンラベルに写る場合は確率を合算してから
/// argmaxを取る。表にないネイティブラベルは契約違反として扱う。
#[derive(Debug, Clone, PartialEq)]
pub struct LabelAdapter {
    mapping: FxHashMap<String, SentimentLabel>,
}

impl Default for LabelAdapter {
    fn default() -> Self {
        Self::from_pairs([
            ("negative", SentimentLabel::Negative),
            ("neutral", SentimentLabel::Neutral),
            ("positive", SentimentLabel::Positive),
            ("label_0", SentimentLabel::Negative),
            ("label_1", SentimentLabel::Neutral),
            ("label_2", SentimentLabel::Positive),
        ])
    }
}

impl LabelAdapter {
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, SentimentLabel)>,
        K: AsRef<str>,
    {
        let mapping = pairs
            .into_iter()
            .map(|(native, label)| (native.as_ref().trim().to_lowercase(), label))
            .collect();
        Self { mapping }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// ネイティブ分布をエンジンのスコアへ変換する。
    ///
    /// `raw_score`は `P(Positive) - P(Negative)`。
    ///
    /// # Errors
    /// 表にないラベルや有限でない確率を受け取った場合は
    /// [`EngineError::ContractViolation`]。
    pub fn adapt(&self, classes: &[NativeClass]) -> Result<ScoreResult, EngineError> {
        let mut merged: FxHashMap<SentimentLabel, f64> = FxHashMap::default();
        for class in classes {
            let key = class.label.trim().to_lowercase();
            let label = self.mapping.get(&key).copied().ok_or_else(|| {
                EngineError::contract(format!(
                    "context model emitted unmapped label {:?}",
                    class.label
                ))
            })?;
            if !class.probability.is_finite() || class.probability < 0.0 {
                return Err(EngineError::contract(format!(
                    "context model emitted invalid probability {} for {:?}",
                    class.probability, class.label
                )));
            }
            *merged.entry(label).or_insert(0.0) += class.probability;
        }

        let mut best: Option<(SentimentLabel, f64)> = None;
        for label in SentimentLabel::ALL {
            let Some(probability) = merged.get(&label).copied() else {
                continue;
            };
            if best.is_none_or(|(_, current)| probability > current) {
                best = Some((label, probability));
            }
        }
        let (label, confidence) =
            best.ok_or_else(|| EngineError::contract("context model emitted no classes"))?;

        let positive = merged.get(&SentimentLabel::Positive).copied().unwrap_or(0.0);
        let negative = merged.get(&SentimentLabel::Negative).copied().unwrap_or(0.0);
        Ok(ScoreResult::new(label, confidence, positive - negative))
    }
}

/// 同時実行数とタイムアウトの設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextSettings {
    pub workers: usize,
    pub timeout: Duration,
    pub max_input_tokens: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            timeout: Duration::from_secs(10),
            max_input_tokens: 512,
        }
    }
}

/// 文脈スコアラー。
pub struct ContextScorer {
    model: Arc<dyn ContextModel>,
    adapter: LabelAdapter,
    semaphore: Arc<Semaphore>,
    settings: ContextSettings,
    latency: Option<Histogram>,
}

impl std::fmt::Debug for ContextScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextScorer")
            .field("model", &self.model.name())
            .field("adapter", &self.adapter)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ContextScorer {
    #[must_use]
    pub fn new(model: Arc<dyn ContextModel>, adapter: LabelAdapter, settings: ContextSettings) -> Self {
        Self {
            model,
            adapter,
            semaphore: Arc::new(Semaphore::new(settings.workers.max(1))),
            settings,
            latency: None,
        }
    }

    #[must_use]
    pub fn with_latency_histogram(mut self, histogram: Histogram) -> Self {
        self.latency = Some(histogram);
        self
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    fn unavailable(reason: impl Into<String>) -> ScorerOutcome {
        let error = EngineError::ScorerUnavailable {
            technique: Technique::Context.to_string(),
            reason: reason.into(),
        };
        ScorerOutcome::Unavailable {
            reason: error.to_string(),
        }
    }
}

#[async_trait]
impl SentimentScorer for ContextScorer {
    fn technique(&self) -> Technique {
        Technique::Context
    }

    async fn score(&self, text: &NormalizedText) -> Result<ScorerOutcome, EngineError> {
        let (input, truncated_tokens) = head_truncate(text.as_str(), self.settings.max_input_tokens);

        let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return Ok(Self::unavailable("context worker pool closed"));
        };

        // 許可は推論タスク側で保持する。タイムアウトで待機を打ち切っても、
        // バックエンドが返るまで枠は埋まったままになる。
        let model = Arc::clone(&self.model);
        let inference = tokio::spawn(async move {
            let _permit = permit;
            model.classify(&input).await
        });

        let started = Instant::now();
        let outcome = timeout(self.settings.timeout, inference).await;
        let elapsed = started.elapsed();
        if let Some(histogram) = &self.latency {
            histogram.observe(elapsed.as_secs_f64());
        }

        let classes = match outcome {
            Err(_) => {
                warn!(
                    model = self.model.name(),
                    timeout_ms = self.settings.timeout.as_millis() as u64,
                    "context model timed out"
                );
                return Ok(Self::unavailable(format!(
                    "timed out after {}ms",
                    self.settings.timeout.as_millis()
                )));
            }
            Ok(Err(join_error)) => {
                warn!(model = self.model.name(), error = %join_error, "context model task aborted");
                return Ok(Self::unavailable(format!("model task aborted: {join_error}")));
            }
            Ok(Ok(Err(error))) => {
                warn!(model = self.model.name(), error = %error, "context model failed");
                return Ok(Self::unavailable(format!("{error:#}")));
            }
            Ok(Ok(Ok(classes))) if classes.is_empty() => {
                return Ok(Self::unavailable("context model returned no classes"));
            }
            Ok(Ok(Ok(classes))) => classes,
        };

        let result = self.adapter.adapt(&classes)?;
        debug!(
            model = self.model.name(),
            label = %result.label,
            confidence = result.confidence,
            elapsed_ms = elapsed.as_millis() as u64,
            truncated = truncated_tokens.is_some(),
            "context model scored review"
        );
        Ok(ScorerOutcome::Scored(result.with_notes(ScoreNotes {
            truncated_tokens,
            slang_terms: Vec::new(),
        })))
    }
}

/// 先頭`max_tokens`語だけを残す。切り詰めた場合は元の語数を返す。
fn head_truncate(text: &str, max_tokens: usize) -> (String, Option<usize>) {
    let total = text.split_whitespace().count();
    if max_tokens == 0 || total <= max_tokens {
        return (text.to_string(), None);
    }
    let head = text
        .split_whitespace()
        .take(max_tokens)
        .collect::<Vec<_>>()
        .join(" ");
    (head, Some(total))
}
