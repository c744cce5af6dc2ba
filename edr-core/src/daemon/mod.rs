//! Sync daemon
//!
//! Drives the fetch → reconcile → persist cycle on a fixed interval. Cycles
//! never overlap: a trigger that arrives while one is running is skipped.
//! Transient listing failures are retried with backoff; authentication
//! failures stop the daemon.

pub mod retry;
pub mod state;

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::model::{DocumentRecord, RawDocument, SourceDocument};
use crate::reconcile::{reconcile, MissingDocumentPolicy, Reconciliation};
use crate::source::{DocumentSource, FetchError, FolderFilter};
use crate::store::{DocumentStore, StoreError};

pub use retry::RetryPolicy;
pub use state::{InvalidTransition, PhaseEvent, SyncPhase};

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub interval: Duration,
    pub retry: RetryPolicy,
    pub missing_policy: MissingDocumentPolicy,
    /// Run the first cycle immediately instead of one interval in
    pub run_on_startup: bool,
    pub filter: FolderFilter,
}

impl DaemonConfig {
    pub fn new(filter: FolderFilter) -> Self {
        Self {
            interval: Duration::from_secs(15 * 60),
            retry: RetryPolicy::default(),
            missing_policy: MissingDocumentPolicy::default(),
            run_on_startup: true,
            filter,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("a sync cycle is already running")]
    Busy,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("listing failed after {attempts} attempts: {last}")]
    FetchExhausted { attempts: u32, last: FetchError },

    #[error("listing failed: {0}")]
    Fetch(FetchError),

    #[error("store failure: {0}")]
    Store(StoreError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl SyncError {
    /// Errors that need an operator; the daemon stops on these.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

impl From<FetchError> for SyncError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Auth(msg) => SyncError::Auth(msg),
            other => SyncError::Fetch(other),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Auth(msg) => SyncError::Auth(msg),
            other => SyncError::Store(other),
        }
    }
}

/// What one completed cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub synced_at: Option<DateTime<Utc>>,
    pub fetch_attempts: u32,
    pub fetched: usize,
    /// Listing entries rejected by validation
    pub invalid_documents: usize,
    /// Stored rows that could not be read
    pub malformed_rows: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub missing: usize,
    pub flagged: usize,
    pub written: usize,
    /// Writes that hit a concurrent edit and succeeded on retry
    pub conflicts_resolved: usize,
    /// Rows left alone this cycle
    pub skipped: Vec<String>,
}

enum PersistOutcome {
    Written,
    WrittenAfterConflict,
    Skipped,
}

pub struct SyncDaemon {
    source: Arc<dyn DocumentSource>,
    store: Arc<dyn DocumentStore>,
    config: DaemonConfig,
    cycle_lock: Mutex<()>,
    phase: watch::Sender<SyncPhase>,
}

impl SyncDaemon {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        store: Arc<dyn DocumentStore>,
        config: DaemonConfig,
    ) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            source,
            store,
            config,
            cycle_lock: Mutex::new(()),
            phase,
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Follow phase changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase.borrow().clone()
    }

    pub async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle with `now` as the scoring and sync time.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<CycleReport, SyncError> {
        let _guard = self.cycle_lock.try_lock().map_err(|_| SyncError::Busy)?;

        self.transition(PhaseEvent::Start)?;
        let mut report = CycleReport::default();
        match self.cycle(now, &mut report).await {
            Ok(()) => {
                info!(
                    source = self.source.id(),
                    store = self.store.id(),
                    fetched = report.fetched,
                    created = report.created,
                    updated = report.updated,
                    missing = report.missing,
                    written = report.written,
                    skipped = report.skipped.len(),
                    "Sync cycle complete"
                );
                Ok(report)
            }
            Err(err) => {
                self.fail(&err);
                Err(err)
            }
        }
    }

    /// Poll on the configured interval until `shutdown` resolves or a fatal
    /// error occurs. A running cycle always finishes before shutdown.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), SyncError>
    where
        F: Future<Output = ()>,
    {
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut ticker = if self.config.run_on_startup {
            interval(period)
        } else {
            interval_at(Instant::now() + period, period)
        };
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            interval_secs = period.as_secs(),
            folder = %self.config.filter.folder_id,
            "Sync loop started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, sync loop stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.run_cycle().await {
                        Ok(_) => {}
                        Err(SyncError::Busy) => debug!("Previous cycle still running, tick skipped"),
                        Err(err) if err.is_fatal() => {
                            error!(error = %err, "Fatal sync error, stopping");
                            return Err(err);
                        }
                        Err(err) => warn!(error = %err, "Sync cycle abandoned, retrying next interval"),
                    }
                }
            }
        }
    }

    async fn cycle(&self, now: DateTime<Utc>, report: &mut CycleReport) -> Result<(), SyncError> {
        let raw = self.fetch(report).await?;
        self.transition(PhaseEvent::Fetched)?;

        report.fetched = raw.len();
        let fresh = validate(raw, report);

        let snapshot = self.store.read_all().await?;
        report.malformed_rows = snapshot.malformed.len();
        let unreadable: HashSet<String> = snapshot
            .malformed
            .iter()
            .filter_map(|err| err.id().map(str::to_string))
            .collect();
        for err in &snapshot.malformed {
            warn!(error = %err, "Skipping unreadable row");
        }

        let merged = reconcile(&fresh, &snapshot.records, now, self.config.missing_policy);
        report.created = merged.created.len();
        report.updated = merged.updated.len();
        report.unchanged = merged.unchanged.len();
        report.missing = merged.missing.len();
        report.flagged = merged.flagged.len();
        self.transition(PhaseEvent::Reconciled)?;

        self.persist(&merged, &unreadable, report).await?;
        self.store.mark_synced(now).await?;
        report.synced_at = Some(now);
        self.transition(PhaseEvent::Persisted)?;
        Ok(())
    }

    async fn fetch(&self, report: &mut CycleReport) -> Result<Vec<RawDocument>, SyncError> {
        let policy = self.config.retry;
        let mut attempt = 1;
        loop {
            report.fetch_attempts = attempt;
            match self.source.list_tracked_documents(&self.config.filter).await {
                Ok(documents) => return Ok(documents),
                Err(err) if err.is_retryable() && policy.allows_another(attempt) => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Listing failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    self.transition(PhaseEvent::Retry)?;
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    return Err(SyncError::FetchExhausted {
                        attempts: attempt,
                        last: err,
                    })
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn persist(
        &self,
        merged: &Reconciliation,
        unreadable: &HashSet<String>,
        report: &mut CycleReport,
    ) -> Result<(), SyncError> {
        for id in merged.dirty_ids() {
            let Some(record) = merged.records.get(id) else {
                continue;
            };
            if unreadable.contains(id) {
                warn!(id = %id, "Row is unreadable in the store, not overwriting");
                report.skipped.push(id.clone());
                continue;
            }

            match self.persist_record(record).await? {
                PersistOutcome::Written => report.written += 1,
                PersistOutcome::WrittenAfterConflict => {
                    report.written += 1;
                    report.conflicts_resolved += 1;
                }
                PersistOutcome::Skipped => report.skipped.push(id.clone()),
            }
        }
        Ok(())
    }

    /// Write one record without clobbering a dashboard edit.
    ///
    /// The live row's status and notes are carried into the write and
    /// passed as the expected value. A conflict means someone edited the
    /// row in between; their values are adopted and the write retried once.
    /// A row that stopped parsing is left for the dashboard to fix.
    async fn persist_record(&self, record: &DocumentRecord) -> Result<PersistOutcome, SyncError> {
        let mut record = record.clone();
        let live = match self.store.read_row(&record.id).await {
            Ok(live) => live,
            Err(StoreError::Unreadable { id, reason }) => return Ok(skip_unreadable(&id, &reason)),
            Err(err) => return Err(err.into()),
        };
        let expected = live.as_ref().map(DocumentRecord::user_fields);
        if let Some(fields) = &expected {
            record.apply_user_fields(fields);
        }

        let current = match self.store.upsert(&record, expected.as_ref()).await {
            Ok(()) => return Ok(PersistOutcome::Written),
            Err(StoreError::Conflict { current, .. }) => current,
            Err(StoreError::Unreadable { id, reason }) => return Ok(skip_unreadable(&id, &reason)),
            Err(err) => return Err(err.into()),
        };

        debug!(id = %record.id, "Row changed during write, adopting live values");
        if let Some(fields) = &current {
            record.apply_user_fields(fields);
        }
        match self.store.upsert(&record, current.as_ref()).await {
            Ok(()) => Ok(PersistOutcome::WrittenAfterConflict),
            Err(StoreError::Conflict { .. }) => {
                warn!(id = %record.id, "Row keeps changing, skipping until next cycle");
                Ok(PersistOutcome::Skipped)
            }
            Err(StoreError::Unreadable { id, reason }) => Ok(skip_unreadable(&id, &reason)),
            Err(err) => Err(err.into()),
        }
    }

    fn transition(&self, event: PhaseEvent) -> Result<(), InvalidTransition> {
        let next = self.phase.borrow().advance(event)?;
        debug!(phase = %next, "Sync phase");
        self.phase.send_replace(next);
        Ok(())
    }

    fn fail(&self, err: &SyncError) {
        let failed = self.transition(PhaseEvent::Fail(err.to_string()));
        if err.is_fatal() {
            error!(error = %err, "Sync cycle failed");
        } else {
            warn!(error = %err, "Sync cycle failed");
        }
        if failed.and_then(|_| self.transition(PhaseEvent::Reset)).is_err() {
            self.phase.send_replace(SyncPhase::Idle);
        }
    }
}

/// Drop listing entries that cannot become records.
fn validate(raw: Vec<RawDocument>, report: &mut CycleReport) -> Vec<SourceDocument> {
    let mut fresh = Vec::with_capacity(raw.len());
    for document in raw {
        match SourceDocument::try_from(document) {
            Ok(doc) => fresh.push(doc),
            Err(err) => {
                report.invalid_documents += 1;
                warn!(error = %err, "Skipping malformed document");
            }
        }
    }
    fresh
}

fn skip_unreadable(id: &str, reason: &str) -> PersistOutcome {
    warn!(id, reason, "Row cannot be read, not overwriting");
    PersistOutcome::Skipped
}
