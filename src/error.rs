// src/error.rs
//! Error taxonomy shared by the pipeline stages.
//!
//! Every per-item error is caught at the orchestrator's item boundary; only
//! [`StoreError`] may abort a whole cycle.

use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A source could not be listed this cycle. The source is skipped.
    #[error("source `{source_name}` unavailable: {reason}")]
    SourceUnavailable { source_name: String, reason: String },

    /// Article page could not be fetched or yielded no text.
    #[error("content unavailable: {reason}")]
    ContentUnavailable { reason: String, transient: bool },

    /// Translation/summarization API failed or is not configured.
    #[error("enrichment unavailable: {reason}")]
    EnrichmentUnavailable { reason: String, transient: bool },

    /// Translated text matched an error-page fingerprint.
    #[error("content policy violation: matched rule `{rule}`")]
    ContentPolicyViolation { rule: String },

    #[error("delivery to `{destination}` unavailable: {reason}")]
    DeliveryUnavailable {
        destination: String,
        reason: String,
        transient: bool,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn content(reason: impl Into<String>, transient: bool) -> Self {
        Self::ContentUnavailable {
            reason: reason.into(),
            transient,
        }
    }

    pub fn enrichment(reason: impl Into<String>, transient: bool) -> Self {
        Self::EnrichmentUnavailable {
            reason: reason.into(),
            transient,
        }
    }

    pub fn delivery(destination: impl Into<String>, reason: impl Into<String>, transient: bool) -> Self {
        Self::DeliveryUnavailable {
            destination: destination.into(),
            reason: reason.into(),
            transient,
        }
    }

    /// Whether another attempt of the same call could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::SourceUnavailable { .. } => true,
            Self::ContentUnavailable { transient, .. }
            | Self::EnrichmentUnavailable { transient, .. }
            | Self::DeliveryUnavailable { transient, .. } => *transient,
            Self::ContentPolicyViolation { .. } | Self::Store(_) => false,
        }
    }
}

/// Unrecoverable Dedup Store failure. Fatal for the cycle.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },

    #[error("invalid persisted record: {0}")]
    InvalidData(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Transport errors worth another attempt: timeouts, connect failures, 429 and 5xx.
pub(crate) fn is_transient_http(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        return true;
    }
    err.status().is_some_and(is_transient_status)
}

pub(crate) fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
