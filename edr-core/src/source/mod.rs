//! Metadata extraction from the document store.
//!
//! This module defines the `DocumentSource` trait - the seam between the
//! sync cycle and whatever lists the tracked documents.

pub mod drive;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::auth::TokenError;
use crate::google::ApiFailure;
use crate::model::RawDocument;

pub use drive::DriveSource;
pub use mock::MockSource;

/// MIME type of native Google Docs.
pub const GOOGLE_DOC_MIME: &str = "application/vnd.google-apps.document";

/// Errors from listing documents.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    /// Network failure or quota exhaustion, retry later
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// Credential or permission failure, needs an operator
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The listing request was refused outright
    #[error("listing rejected: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl From<ApiFailure> for FetchError {
    fn from(failure: ApiFailure) -> Self {
        match failure {
            ApiFailure::Transient(msg) => FetchError::Transient(msg),
            ApiFailure::Auth(msg) => FetchError::Auth(msg),
            ApiFailure::Rejected { status, body } => FetchError::Rejected { status, body },
        }
    }
}

impl From<TokenError> for FetchError {
    fn from(err: TokenError) -> Self {
        if err.is_fatal() {
            FetchError::Auth(err.to_string())
        } else {
            FetchError::Transient(err.to_string())
        }
    }
}

/// Which documents are tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderFilter {
    /// Folder the review documents live in
    pub folder_id: String,
    /// Only files of this type are listed
    pub mime_type: String,
    /// List files sitting in the trash too
    pub include_trashed: bool,
}

impl FolderFilter {
    pub fn new(folder_id: impl Into<String>) -> Self {
        Self {
            folder_id: folder_id.into(),
            mime_type: GOOGLE_DOC_MIME.to_string(),
            include_trashed: false,
        }
    }

    /// Drive search query for this filter.
    pub fn query(&self) -> String {
        let mut query = format!(
            "'{}' in parents and mimeType = '{}'",
            escape_literal(&self.folder_id),
            escape_literal(&self.mime_type)
        );
        if !self.include_trashed {
            query.push_str(" and trashed = false");
        }
        query
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Lists the documents currently visible under a filter.
///
/// Every call returns a complete snapshot; there is no cursor carried
/// between calls.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Identifier used in logs.
    fn id(&self) -> &str;

    async fn list_tracked_documents(
        &self,
        filter: &FolderFilter,
    ) -> Result<Vec<RawDocument>, FetchError>;
}
