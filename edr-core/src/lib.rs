//! EDR Core - Design review tracking
//!
//! Keeps a review-tracking table in step with the folder of engineering
//! design documents it tracks:
//! - Urgency scoring from document age and staleness
//! - Drive listing with validation of every entry
//! - Pure reconciliation that never touches user-owned review status
//! - A polling daemon with retry, skip-if-busy and conflict-safe writes
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐     ┌──────────────┐     ┌────────────────┐
//! │ DocumentSource │────▶│  reconcile() │────▶│ DocumentStore  │
//! │ (Drive / mock) │     │  + priority  │     │ (Sheets / mem) │
//! └────────────────┘     └──────────────┘     └────────────────┘
//!          ▲                                          ▲
//!          └──────────────── SyncDaemon ──────────────┘
//! ```

pub mod auth;
pub mod daemon;
pub mod model;
pub mod priority;
pub mod reconcile;
pub mod source;
pub mod store;
pub mod summary;

mod google;

// Re-export main types for convenience
pub use auth::{AuthorizedUserToken, StaticToken, TokenError, TokenSource};
pub use daemon::{CycleReport, DaemonConfig, RetryPolicy, SyncDaemon, SyncError, SyncPhase};
pub use model::{DocumentRecord, MalformedRecordError, RawDocument, ReviewStatus, SourceDocument, UserFields};
pub use priority::{Priority, PriorityTier};
pub use reconcile::{reconcile, MissingDocumentPolicy, Reconciliation};
pub use source::{DocumentSource, DriveSource, FetchError, FolderFilter, MockSource};
pub use store::{DocumentStore, MemoryStore, SheetsStore, StoreError, StoreSnapshot};
pub use summary::ReviewSummary;
