//! Steam `appreviews` JSONの読み込み。
//!
//! APIの生レスポンス（`{"success": 1, "reviews": [...]}`）と、収集スクリプトが
//! 書き出すフラットな配列の両方を受け付ける。必須フィールドが欠けたレコードは
//! 全体を失敗させず、[`EngineError::MalformedInput`]として個別に返す。
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::error::EngineError;
use crate::review::{RawReview, ReviewMetadata};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read review dump at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("review payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("steam api reported success={0}")]
    ApiFailure(i64),
    #[error("review payload must be an array or an object with a `reviews` array")]
    UnexpectedShape,
}

/// 読み込み結果。採点対象と、不正レコードの診断。
#[derive(Debug, Default)]
pub struct IngestBatch {
    pub reviews: Vec<RawReview>,
    pub rejected: Vec<EngineError>,
}

impl IngestBatch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.reviews.len() + self.rejected.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reviews.is_empty() && self.rejected.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct SteamReviewRecord {
    #[serde(default, alias = "review_id")]
    recommendationid: Option<Value>,
    #[serde(default, alias = "body")]
    review: Option<String>,
    #[serde(default)]
    voted_up: Option<bool>,
    #[serde(default)]
    author: Option<SteamAuthor>,
    #[serde(default)]
    weighted_vote_score: Option<Value>,
    #[serde(default)]
    game_name: Option<String>,
    #[serde(default)]
    app_id: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SteamAuthor {
    #[serde(default)]
    playtime_forever: Option<u64>,
}

/// ファイルから読み込む。
///
/// # Errors
/// ファイルが読めない、またはJSON全体の形が不正な場合は [`IngestError`]。
pub fn load_file(path: &Path, app_id: Option<u64>) -> Result<IngestBatch, IngestError> {
    let contents = std::fs::read_to_string(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_str(&contents, app_id)
}

/// 文字列から読み込む。
///
/// # Errors
/// JSONとして不正、またはAPIが失敗を返している場合は [`IngestError`]。
pub fn parse_str(raw: &str, app_id: Option<u64>) -> Result<IngestBatch, IngestError> {
    let value: Value = serde_json::from_str(raw)?;
    parse_value(value, app_id)
}

/// パース済みJSONから読み込む。`app_id`はレコード側に無い場合の既定値。
///
/// # Errors
/// 配列でも`reviews`を持つオブジェクトでもない場合、または`success`が1以外の場合。
pub fn parse_value(value: Value, app_id: Option<u64>) -> Result<IngestBatch, IngestError> {
    let records = match value {
        Value::Array(records) => records,
        Value::Object(mut envelope) => {
            if let Some(success) = envelope.get("success").and_then(Value::as_i64) {
                if success != 1 {
                    return Err(IngestError::ApiFailure(success));
                }
            }
            match envelope.remove("reviews") {
                Some(Value::Array(records)) => records,
                _ => return Err(IngestError::UnexpectedShape),
            }
        }
        _ => return Err(IngestError::UnexpectedShape),
    };

    let mut batch = IngestBatch::default();
    for (index, record) in records.into_iter().enumerate() {
        match to_raw_review(record, app_id) {
            Ok(review) => batch.reviews.push(review),
            Err(err) => {
                warn!(index, error = %err, "skipping malformed review record");
                batch.rejected.push(err);
            }
        }
    }
    Ok(batch)
}

fn to_raw_review(record: Value, default_app_id: Option<u64>) -> Result<RawReview, EngineError> {
    let hinted_id = record.get("recommendationid").and_then(id_string);
    let record: SteamReviewRecord =
        serde_json::from_value(record).map_err(|err| EngineError::MalformedInput {
            review_id: hinted_id,
            reason: err.to_string(),
        })?;

    let review_id = record
        .recommendationid
        .as_ref()
        .and_then(id_string)
        .ok_or_else(|| EngineError::MalformedInput {
            review_id: None,
            reason: "missing recommendationid".into(),
        })?;
    let body = record.review.ok_or_else(|| EngineError::MalformedInput {
        review_id: Some(review_id.clone()),
        reason: "missing review body".into(),
    })?;

    Ok(RawReview {
        review_id,
        body,
        metadata: ReviewMetadata {
            app_id: record.app_id.or(default_app_id),
            game_name: record.game_name,
            playtime_minutes: record.author.and_then(|author| author.playtime_forever),
            recommended: record.voted_up,
            weighted_vote_score: record.weighted_vote_score.as_ref().and_then(score_f64),
        },
    })
}

/// Steamはidを文字列で返すが、数値で保存されたダンプも受け付ける。
fn id_string(value: &Value) -> Option<String> {
    let id = match value {
        Value::String(id) => id.trim().to_string(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

fn score_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(score) => score.as_f64(),
        Value::String(score) => score.trim().parse().ok(),
        _ => None,
    }
}
