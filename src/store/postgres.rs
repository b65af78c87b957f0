use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::{
    Json,
    chrono::{DateTime, Utc},
};
use sqlx::{PgPool, Row};

use super::{ReviewQuery, ReviewStatus, ReviewStore};
use crate::review::{
    Agreement, DisagreementKind, FilterReason, LanguageVerdict, ReviewMetadata, ScoredReview,
    ScorerOutcome,
};

const SCHEMA_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS scored_reviews (
        review_id         TEXT PRIMARY KEY,
        normalized_text   TEXT NOT NULL,
        language_status   TEXT NOT NULL,
        filter_reason     TEXT NOT NULL,
        lexicon_result    JSONB,
        context_result    JSONB,
        agreement         TEXT,
        disagreement_kind TEXT,
        status            TEXT NOT NULL,
        metadata          JSONB NOT NULL DEFAULT '{}'::jsonb,
        engine_version    TEXT NOT NULL,
        text_hash         BIGINT NOT NULL,
        scored_at         TIMESTAMPTZ NOT NULL
    )
";

const STATUS_INDEX_SQL: &str = r"
    CREATE INDEX IF NOT EXISTS scored_reviews_status_idx
        ON scored_reviews (status, disagreement_kind, scored_at DESC)
";

/// Postgres実装。
#[derive(Debug, Clone)]
pub struct PgReviewStore {
    pool: PgPool,
}

impl PgReviewStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// テーブルとインデックスが無ければ作成する。
    ///
    /// # Errors
    /// DDLの実行に失敗した場合。
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .context("failed to create scored_reviews table")?;
        sqlx::query(STATUS_INDEX_SQL)
            .execute(&self.pool)
            .await
            .context("failed to create scored_reviews status index")?;
        Ok(())
    }
}

#[async_trait]
impl ReviewStore for PgReviewStore {
    async fn upsert(&self, review: &ScoredReview) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO scored_reviews (
                review_id, normalized_text, language_status, filter_reason,
                lexicon_result, context_result, agreement, disagreement_kind,
                status, metadata, engine_version, text_hash, scored_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (review_id) DO UPDATE SET
                normalized_text = EXCLUDED.normalized_text,
                language_status = EXCLUDED.language_status,
                filter_reason = EXCLUDED.filter_reason,
                lexicon_result = EXCLUDED.lexicon_result,
                context_result = EXCLUDED.context_result,
                agreement = EXCLUDED.agreement,
                disagreement_kind = EXCLUDED.disagreement_kind,
                status = EXCLUDED.status,
                metadata = EXCLUDED.metadata,
                engine_version = EXCLUDED.engine_version,
                text_hash = EXCLUDED.text_hash,
                scored_at = EXCLUDED.scored_at
            ",
        )
        .bind(&review.review_id)
        .bind(&review.normalized_text)
        .bind(review.language_verdict.status_str())
        .bind(review.language_verdict.reason().as_str())
        .bind(review.lexicon_result.as_ref().map(Json))
        .bind(review.context_result.as_ref().map(Json))
        .bind(review.agreement.map(Agreement::as_str))
        .bind(review.disagreement_kind.map(DisagreementKind::as_str))
        .bind(ReviewStatus::of(review).as_str())
        .bind(Json(&review.metadata))
        .bind(&review.engine_version)
        .bind(i64::from_ne_bytes(review.text_hash.to_ne_bytes()))
        .bind(review.scored_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert scored review {}", review.review_id))?;
        Ok(())
    }

    async fn get(&self, review_id: &str) -> Result<Option<ScoredReview>> {
        let row = sqlx::query(
            r"
            SELECT review_id, normalized_text, language_status, filter_reason,
                   lexicon_result, context_result, agreement, disagreement_kind,
                   metadata, engine_version, text_hash, scored_at
            FROM scored_reviews
            WHERE review_id = $1
            ",
        )
        .bind(review_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to fetch scored review {review_id}"))?;

        row.as_ref().map(row_to_review).transpose()
    }

    async fn list(&self, query: &ReviewQuery) -> Result<Vec<ScoredReview>> {
        let limit = i64::try_from(query.effective_limit()).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r"
            SELECT review_id, normalized_text, language_status, filter_reason,
                   lexicon_result, context_result, agreement, disagreement_kind,
                   metadata, engine_version, text_hash, scored_at
            FROM scored_reviews
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR disagreement_kind = $2)
            ORDER BY scored_at DESC, review_id
            LIMIT $3
            ",
        )
        .bind(query.status.map(ReviewStatus::as_str))
        .bind(query.kind.map(DisagreementKind::as_str))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("failed to list scored reviews")?;

        rows.iter().map(row_to_review).collect()
    }
}

fn row_to_review(row: &PgRow) -> Result<ScoredReview> {
    let language_status: String = row.try_get("language_status")?;
    let filter_reason: String = row.try_get("filter_reason")?;
    let language_verdict = if language_status == "accepted" {
        LanguageVerdict::Accepted
    } else {
        let reason = FilterReason::parse(&filter_reason)
            .ok_or_else(|| anyhow!("unknown filter reason in store: {filter_reason}"))?;
        LanguageVerdict::Filtered(reason)
    };

    let agreement = row
        .try_get::<Option<String>, _>("agreement")?
        .map(|raw| Agreement::parse(&raw).ok_or_else(|| anyhow!("unknown agreement: {raw}")))
        .transpose()?;
    let disagreement_kind = row
        .try_get::<Option<String>, _>("disagreement_kind")?
        .map(|raw| {
            DisagreementKind::parse(&raw).ok_or_else(|| anyhow!("unknown disagreement kind: {raw}"))
        })
        .transpose()?;

    let lexicon_result = row
        .try_get::<Option<Json<ScorerOutcome>>, _>("lexicon_result")?
        .map(|Json(outcome)| outcome);
    let context_result = row
        .try_get::<Option<Json<ScorerOutcome>>, _>("context_result")?
        .map(|Json(outcome)| outcome);
    let Json(metadata) = row.try_get::<Json<ReviewMetadata>, _>("metadata")?;
    let text_hash: i64 = row.try_get("text_hash")?;
    let scored_at: DateTime<Utc> = row.try_get("scored_at")?;

    Ok(ScoredReview {
        review_id: row.try_get("review_id")?,
        normalized_text: row.try_get("normalized_text")?,
        language_verdict,
        lexicon_result,
        context_result,
        agreement,
        disagreement_kind,
        metadata,
        engine_version: row.try_get("engine_version")?,
        text_hash: u64::from_ne_bytes(text_hash.to_ne_bytes()),
        scored_at,
    })
}
