//! Persisted tracking table
//!
//! The table is keyed by document id. Sync-owned columns are written by the
//! daemon; `status` and `notes` belong to dashboard users. Writes are
//! conditional on the user columns still holding the value the writer last
//! saw, so a dashboard edit that lands mid-cycle surfaces as a conflict
//! instead of being overwritten.

pub mod layout;
pub mod memory;
pub mod sheets;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::TokenError;
use crate::google::ApiFailure;
use crate::model::{DocumentRecord, MalformedRecordError, UserFields};

pub use memory::{EditTiming, MemoryStore};
pub use sheets::SheetsStore;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store authentication failed: {0}")]
    Auth(String),

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store rejected request: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The row's user columns no longer match what the writer expected
    #[error("row {id} was changed concurrently")]
    Conflict {
        id: String,
        current: Option<UserFields>,
    },

    /// The row exists but cannot be parsed; it must not be written
    #[error("row {id} cannot be read: {reason}")]
    Unreadable { id: String, reason: String },

    #[error("unexpected store response: {0}")]
    InvalidResponse(String),
}

impl From<ApiFailure> for StoreError {
    fn from(failure: ApiFailure) -> Self {
        match failure {
            ApiFailure::Transient(msg) => StoreError::Transient(msg),
            ApiFailure::Auth(msg) => StoreError::Auth(msg),
            ApiFailure::Rejected { status, body } => StoreError::Rejected { status, body },
        }
    }
}

impl From<TokenError> for StoreError {
    fn from(err: TokenError) -> Self {
        if err.is_fatal() {
            StoreError::Auth(err.to_string())
        } else {
            StoreError::Transient(err.to_string())
        }
    }
}

/// Full-table read.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub records: BTreeMap<String, DocumentRecord>,
    /// Rows that could not be read back, skipped
    pub malformed: Vec<MalformedRecordError>,
}

/// Tabular store holding one row per tracked document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Identifier used in logs.
    fn id(&self) -> &str;

    /// Read every row.
    async fn read_all(&self) -> Result<StoreSnapshot, StoreError>;

    /// Read one row as it is right now. A row that exists but cannot be
    /// parsed is `StoreError::Unreadable`, not `None`.
    async fn read_row(&self, id: &str) -> Result<Option<DocumentRecord>, StoreError>;

    /// Insert or update a row.
    ///
    /// `expected` is the user columns the caller believes the row holds, or
    /// `None` if it believes there is no row yet. On mismatch nothing is
    /// written and `StoreError::Conflict` carries the live values. Existing
    /// rows only get their sync-owned columns written. Unreadable rows are
    /// never written or appended again.
    async fn upsert(
        &self,
        record: &DocumentRecord,
        expected: Option<&UserFields>,
    ) -> Result<(), StoreError>;

    /// Record when the last successful cycle finished.
    async fn mark_synced(&self, at: DateTime<Utc>) -> Result<(), StoreError>;
}
