use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use super::error_response;
use crate::app::AppState;
use crate::review::{DisagreementKind, ScoredReview};
use crate::store::{DEFAULT_LIST_LIMIT, ReviewQuery, ReviewStatus};

/// Query parameters for GET /v1/reviews
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReviewResponse {
    status: &'static str,
    #[serde(flatten)]
    review: ScoredReview,
}

impl From<ScoredReview> for ReviewResponse {
    fn from(review: ScoredReview) -> Self {
        Self {
            status: review.status(),
            review,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ReviewListResponse {
    count: usize,
    reviews: Vec<ReviewResponse>,
}

/// GET /v1/reviews
/// Filtered・Indeterminateを含む保存済みレビューを新しい順に返す。
pub(crate) async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> impl IntoResponse {
    let status = match params.status.as_deref().map(str::parse::<ReviewStatus>).transpose() {
        Ok(status) => status,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err),
    };
    let kind = match params.kind.as_deref() {
        Some(raw) => match DisagreementKind::parse(raw) {
            Some(kind) => Some(kind),
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("unknown disagreement kind: {raw}"),
                );
            }
        },
        None => None,
    };
    let query = ReviewQuery {
        status,
        kind,
        limit: params.limit.unwrap_or(DEFAULT_LIST_LIMIT),
    };

    match state.store().list(&query).await {
        Ok(reviews) => {
            let reviews: Vec<ReviewResponse> = reviews.into_iter().map(Into::into).collect();
            (
                StatusCode::OK,
                Json(ReviewListResponse {
                    count: reviews.len(),
                    reviews,
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "failed to list reviews");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to list reviews")
        }
    }
}

/// GET /v1/reviews/{review_id}
pub(crate) async fn get_one(
    State(state): State<AppState>,
    Path(review_id): Path<String>,
) -> impl IntoResponse {
    match state.store().get(&review_id).await {
        Ok(Some(review)) => (StatusCode::OK, Json(ReviewResponse::from(review))).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("review {review_id} not found"),
        ),
        Err(err) => {
            error!(%review_id, error = %err, "failed to fetch review");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch review")
        }
    }
}
