use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ReviewQuery, ReviewStore};
use crate::review::ScoredReview;

/// プロセス内ストア。DB未設定時とリプレイ・テストで使う。
#[derive(Debug, Default)]
pub struct MemoryReviewStore {
    reviews: RwLock<BTreeMap<String, ScoredReview>>,
}

impl MemoryReviewStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.reviews.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.reviews.read().await.is_empty()
    }

    /// 保存済みの全件をキー順に返す。
    pub async fn snapshot(&self) -> Vec<ScoredReview> {
        self.reviews.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl ReviewStore for MemoryReviewStore {
    async fn upsert(&self, review: &ScoredReview) -> Result<()> {
        self.reviews
            .write()
            .await
            .insert(review.review_id.clone(), review.clone());
        Ok(())
    }

    async fn get(&self, review_id: &str) -> Result<Option<ScoredReview>> {
        Ok(self.reviews.read().await.get(review_id).cloned())
    }

    async fn list(&self, query: &ReviewQuery) -> Result<Vec<ScoredReview>> {
        let guard = self.reviews.read().await;
        let mut matched: Vec<ScoredReview> = guard
            .values()
            .filter(|review| query.matches(review))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.scored_at
                .cmp(&a.scored_at)
                .then_with(|| a.review_id.cmp(&b.review_id))
        });
        matched.truncate(query.effective_limit());
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::{
        Agreement, DisagreementKind, FilterReason, LanguageVerdict, ReviewMetadata,
    };
    use crate::store::ReviewStatus;
    use chrono::{Duration, Utc};

    fn review(id: &str, agreement: Option<Agreement>, offset_secs: i64) -> ScoredReview {
        let verdict = if agreement.is_some() {
            LanguageVerdict::Accepted
        } else {
            LanguageVerdict::Filtered(FilterReason::NonTargetLanguage)
        };
        ScoredReview {
            review_id: id.into(),
            normalized_text: format!("review {id}"),
            language_verdict: verdict,
            lexicon_result: None,
            context_result: None,
            agreement,
            disagreement_kind: (agreement == Some(Agreement::Disagree))
                .then_some(DisagreementKind::ContextDivergence),
            metadata: ReviewMetadata::default(),
            engine_version: "hybrid_v2".into(),
            text_hash: 0,
            scored_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_existing_record() {
        let store = MemoryReviewStore::new();
        let first = review("1", Some(Agreement::Agree), 0);
        let mut second = review("1", Some(Agreement::Disagree), 1);
        second.engine_version = "hybrid_v3".into();

        store.upsert(&first).await.expect("first upsert");
        store.upsert(&second).await.expect("second upsert");

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("1").await.expect("get"), Some(second));
    }

    #[tokio::test]
    async fn list_filters_by_status_and_kind() {
        let store = MemoryReviewStore::new();
        for (id, agreement, offset) in [
            ("a", Some(Agreement::Agree), 0),
            ("b", Some(Agreement::Disagree), 1),
            ("c", None, 2),
            ("d", Some(Agreement::Disagree), 3),
        ] {
            store
                .upsert(&review(id, agreement, offset))
                .await
                .expect("upsert");
        }

        let disagreements = store
            .list(&ReviewQuery {
                status: Some(ReviewStatus::Disagree),
                kind: Some(DisagreementKind::ContextDivergence),
                limit: 10,
            })
            .await
            .expect("list");
        let ids: Vec<_> = disagreements.iter().map(|r| r.review_id.as_str()).collect();
        assert_eq!(ids, vec!["d", "b"]);

        let filtered = store
            .list(&ReviewQuery {
                status: Some(ReviewStatus::Filtered),
                ..ReviewQuery::default()
            })
            .await
            .expect("list");
        assert_eq!(filtered.len(), 1);

        let limited = store
            .list(&ReviewQuery {
                limit: 2,
                ..ReviewQuery::default()
            })
            .await
            .expect("list");
        assert_eq!(limited.len(), 2);
    }
}
