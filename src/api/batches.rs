use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};
use uuid::Uuid;

use super::error_response;
use crate::{app::AppState, ingest};

/// Query parameters for POST /v1/batches
#[derive(Debug, Default, Deserialize)]
pub(crate) struct BatchQuery {
    /// レコードに`app_id`が無い場合の既定値。
    #[serde(default)]
    app_id: Option<u64>,
}

/// POST /v1/batches
/// Steam形式のレビューJSONを受け取り、同期的に採点して集計を返す。
pub(crate) async fn submit(
    State(state): State<AppState>,
    Query(query): Query<BatchQuery>,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let batch = match ingest::parse_value(payload, query.app_id) {
        Ok(batch) => batch,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, err.to_string());
        }
    };

    let batch_id = Uuid::now_v7().to_string();
    info!(%batch_id, records = batch.len(), "batch submitted");

    let cancel = state.shutdown_token().child_token();
    match state.runner().run_ingested(batch_id.clone(), batch, cancel).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(err) => {
            error!(%batch_id, error = %err, "batch failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}
