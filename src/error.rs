//! エンジンのエラー分類。
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// 必須フィールド欠落。当該レビューのみスキップする。
    #[error("malformed review {review_id:?}: {reason}")]
    MalformedInput {
        review_id: Option<String>,
        reason: String,
    },
    /// モデルバックエンド到達不能またはタイムアウト。バッチは止めず、
    /// 表示文字列が`ScorerOutcome::Unavailable`の理由になる。
    #[error("{technique} scorer unavailable: {reason}")]
    ScorerUnavailable { technique: String, reason: String },
    /// ラベル空間の契約違反。設定・実装の不具合なのでバッチごと中断する。
    #[error("reconciliation contract violated: {detail}")]
    ContractViolation { detail: String },
    #[error("failed to persist review {review_id}: {source}")]
    Store {
        review_id: String,
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    pub(crate) fn contract(detail: impl Into<String>) -> Self {
        Self::ContractViolation {
            detail: detail.into(),
        }
    }

    /// バッチ全体を止めるべきエラーか。
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ContractViolation { .. })
    }
}
