//! Error types for scanning and persistence

use crate::content_id::ContentId;
use crate::pipeline::Stage;
use thiserror::Error;

/// Failure of a verdict cache backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A stored row could not be decoded into a verdict record
    #[error("corrupt cache record for {content_id}: {detail}")]
    Corrupt { content_id: String, detail: String },

    #[error("store worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub fn corrupt(content_id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Corrupt {
            content_id: content_id.into(),
            detail: detail.into(),
        }
    }

    /// Corrupt rows are treated as a cache miss rather than a failure
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

/// Request-level failure of an evaluation
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid content id {0:?}: expected 11 characters of [A-Za-z0-9_-]")]
    InvalidContentId(String),

    /// Acquisition, extraction or a classifier failed outright
    #[error("{stage} failed for {content_id}: {source:#}")]
    ExternalTool {
        stage: Stage,
        content_id: ContentId,
        #[source]
        source: anyhow::Error,
    },

    #[error("verdict cache unavailable: {0}")]
    Persistence(#[from] StoreError),

    #[error("scan for {0} was superseded by a newer request")]
    Superseded(ContentId),

    #[error("scan for {0} is already running; query again shortly")]
    InProgress(ContentId),
}

impl ScanError {
    pub fn external(stage: Stage, content_id: &ContentId, source: anyhow::Error) -> Self {
        Self::ExternalTool {
            stage,
            content_id: content_id.clone(),
            source,
        }
    }

    /// Whether the caller may simply re-issue the request
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExternalTool { .. } | Self::Superseded(_) | Self::InProgress(_)
        )
    }
}
