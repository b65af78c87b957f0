//! バッチ実行。
//!
//! レビューごとに独立したタスクを`JoinSet`で走らせ、完了した順に保存・集計する。
//! 保存は完了済みレコードに対してのみ行うため、キャンセル時に途中結果は残らない。
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::EngineContext;
use crate::error::EngineError;
use crate::ingest::IngestBatch;
use crate::observability::metrics::Metrics;
use crate::review::{BatchReport, RawReview, ScoredReview};
use crate::store::ReviewStore;

/// バッチ実行器。
#[derive(Clone)]
pub struct BatchRunner {
    engine: Arc<EngineContext>,
    store: Arc<dyn ReviewStore>,
    metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl BatchRunner {
    #[must_use]
    pub fn new(engine: Arc<EngineContext>, store: Arc<dyn ReviewStore>) -> Self {
        Self {
            engine,
            store,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[must_use]
    pub fn engine(&self) -> &EngineContext {
        &self.engine
    }

    #[must_use]
    pub fn store(&self) -> Arc<dyn ReviewStore> {
        Arc::clone(&self.store)
    }

    /// レビュー群を採点して保存し、集計を返す。
    ///
    /// 不正入力と保存失敗は`failed`に数えて続行する。キャンセルされた場合は
    /// 未完了タスクを中断し、`cancelled = true`の集計を返す。
    ///
    /// # Errors
    /// 契約違反が起きた場合は残りのタスクを中断して
    /// [`EngineError::ContractViolation`] を返す。
    pub async fn run(
        &self,
        batch_id: impl Into<String>,
        reviews: Vec<RawReview>,
        cancel: CancellationToken,
    ) -> Result<BatchReport, EngineError> {
        let mut report = BatchReport::new(batch_id);
        let started = Instant::now();
        let total = reviews.len();

        if cancel.is_cancelled() {
            report.cancelled = true;
            self.observe_batch(&report, started);
            return Ok(report);
        }

        info!(batch_id = %report.batch_id, reviews = total, "batch started");

        let mut tasks: JoinSet<Result<ScoredReview, EngineError>> = JoinSet::new();
        for review in reviews {
            let engine = Arc::clone(&self.engine);
            let metrics = self.metrics.clone();
            tasks.spawn(async move {
                let review_started = Instant::now();
                let result = engine.score_review(&review).await;
                if let Some(metrics) = &metrics {
                    metrics
                        .review_duration
                        .observe(review_started.elapsed().as_secs_f64());
                }
                result
            });
        }
        if let Some(metrics) = &self.metrics {
            metrics.reviews_received.inc_by(total as f64);
            metrics.reviews_in_flight.add(total as f64);
        }

        let mut pending = total;
        loop {
            let joined = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tasks.abort_all();
                    report.cancelled = true;
                    warn!(
                        batch_id = %report.batch_id,
                        completed = report.total(),
                        aborted = pending,
                        "batch cancelled"
                    );
                    break;
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            pending = pending.saturating_sub(1);
            self.dec_in_flight(1);

            match joined {
                Ok(Ok(scored)) => self.persist(&mut report, &scored).await,
                Ok(Err(err)) if err.is_fatal() => {
                    tasks.abort_all();
                    self.dec_in_flight(pending);
                    if let Some(metrics) = &self.metrics {
                        metrics.contract_violations.inc();
                        metrics.batches_aborted.inc();
                    }
                    error!(batch_id = %report.batch_id, error = %err, "batch aborted");
                    return Err(err);
                }
                Ok(Err(err)) => {
                    warn!(batch_id = %report.batch_id, error = %err, "review skipped");
                    self.record_failed(&mut report);
                }
                Err(join_err) => {
                    error!(batch_id = %report.batch_id, error = %join_err, "review task panicked");
                    self.record_failed(&mut report);
                }
            }
        }

        // abort_all後の残りタスクを回収する
        while tasks.join_next().await.is_some() {}
        self.dec_in_flight(pending);

        self.observe_batch(&report, started);
        info!(
            batch_id = %report.batch_id,
            scored = report.scored,
            filtered = report.filtered,
            indeterminate = report.indeterminate,
            failed = report.failed,
            cancelled = report.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        Ok(report)
    }

    /// 取り込み結果をそのまま実行する。取り込み時に弾かれたレコードは`failed`に加える。
    ///
    /// # Errors
    /// [`BatchRunner::run`]と同じ。
    pub async fn run_ingested(
        &self,
        batch_id: impl Into<String>,
        batch: IngestBatch,
        cancel: CancellationToken,
    ) -> Result<BatchReport, EngineError> {
        let IngestBatch { reviews, rejected } = batch;
        let mut report = self.run(batch_id, reviews, cancel).await?;
        if !rejected.is_empty() {
            report.failed += rejected.len();
            if let Some(metrics) = &self.metrics {
                metrics.reviews_failed.inc_by(rejected.len() as f64);
            }
        }
        Ok(report)
    }

    async fn persist(&self, report: &mut BatchReport, scored: &ScoredReview) {
        match self.store.upsert(scored).await {
            Ok(()) => {
                report.record(scored);
                if let Some(metrics) = &self.metrics {
                    metrics.record_review(scored);
                }
            }
            Err(source) => {
                let err = EngineError::Store {
                    review_id: scored.review_id.clone(),
                    source,
                };
                warn!(batch_id = %report.batch_id, error = %err, "failed to persist review");
                self.record_failed(report);
            }
        }
    }

    fn record_failed(&self, report: &mut BatchReport) {
        report.failed += 1;
        if let Some(metrics) = &self.metrics {
            metrics.reviews_failed.inc();
        }
    }

    fn dec_in_flight(&self, count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.reviews_in_flight.sub(count as f64);
        }
    }

    fn observe_batch(&self, report: &BatchReport, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics
                .batch_duration
                .observe(started.elapsed().as_secs_f64());
            if report.cancelled {
                metrics.batches_cancelled.inc();
            } else {
                metrics.batches_completed.inc();
            }
        }
    }
}
