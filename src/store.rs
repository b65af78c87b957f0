//! 採点結果の永続化。
//!
//! `review_id`を自然キーとするinsert-or-replace。再採点は既存レコードを置き換える。
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::review::{Agreement, DisagreementKind, ScoredReview};

mod memory;
mod postgres;

pub use self::memory::MemoryReviewStore;
pub use self::postgres::PgReviewStore;

/// 一覧APIのデフォルト件数。
pub const DEFAULT_LIST_LIMIT: usize = 100;
/// 一覧APIの上限件数。
pub const MAX_LIST_LIMIT: usize = 1_000;

/// 表示用ステータス。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Filtered,
    Indeterminate,
    Agree,
    Disagree,
}

impl ReviewStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filtered => "filtered",
            Self::Indeterminate => "indeterminate",
            Self::Agree => Agreement::Agree.as_str(),
            Self::Disagree => Agreement::Disagree.as_str(),
        }
    }

    #[must_use]
    pub fn of(review: &ScoredReview) -> Self {
        match review.status() {
            "filtered" => Self::Filtered,
            "agree" => Self::Agree,
            "disagree" => Self::Disagree,
            _ => Self::Indeterminate,
        }
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filtered" => Ok(Self::Filtered),
            "indeterminate" => Ok(Self::Indeterminate),
            "agree" => Ok(Self::Agree),
            "disagree" => Ok(Self::Disagree),
            other => Err(format!("unknown review status: {other}")),
        }
    }
}

/// 一覧取得の条件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewQuery {
    pub status: Option<ReviewStatus>,
    pub kind: Option<DisagreementKind>,
    pub limit: usize,
}

impl Default for ReviewQuery {
    fn default() -> Self {
        Self {
            status: None,
            kind: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl ReviewQuery {
    pub(crate) fn matches(&self, review: &ScoredReview) -> bool {
        self.status.is_none_or(|status| ReviewStatus::of(review) == status)
            && self
                .kind
                .is_none_or(|kind| review.disagreement_kind == Some(kind))
    }

    pub(crate) fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_LIST_LIMIT)
    }
}

/// ReviewStore - 採点済みレビューのデータアクセス層
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// `review_id`をキーに挿入または置換する。
    async fn upsert(&self, review: &ScoredReview) -> Result<()>;

    async fn get(&self, review_id: &str) -> Result<Option<ScoredReview>>;

    /// 新しい順に返す。
    async fn list(&self, query: &ReviewQuery) -> Result<Vec<ScoredReview>>;
}
