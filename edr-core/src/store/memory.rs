//! In-memory store
//!
//! Same conditional-write semantics as the sheet. Dashboard edits can be
//! injected around the daemon's row re-read to reproduce the races the
//! persist step has to survive.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{DocumentStore, StoreError, StoreSnapshot};
use crate::model::{DocumentRecord, ReviewStatus, UserFields};

/// When an injected dashboard edit lands, relative to the next re-read of
/// its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTiming {
    /// Visible to the re-read
    BeforeReread,
    /// After the re-read, before the write
    AfterReread,
}

#[derive(Debug, Clone)]
struct ScheduledEdit {
    id: String,
    fields: UserFields,
    timing: EditTiming,
}

#[derive(Default)]
struct Inner {
    rows: BTreeMap<String, DocumentRecord>,
    edits: Vec<ScheduledEdit>,
    last_synced: Option<DateTime<Utc>>,
    fail_next: Option<StoreError>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    writes: AtomicU32,
    conflicts: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            writes: AtomicU32::new(0),
            conflicts: AtomicU32::new(0),
        }
    }

    pub fn with_records(self, records: impl IntoIterator<Item = DocumentRecord>) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            for record in records {
                inner.rows.insert(record.id.clone(), record);
            }
        }
        self
    }

    /// A dashboard write: change the user columns of an existing row.
    pub fn set_user_fields(&self, id: &str, status: ReviewStatus, notes: &str) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return false;
        };
        match inner.rows.get_mut(id) {
            Some(row) => {
                row.status = status;
                row.notes = notes.to_string();
                true
            }
            None => false,
        }
    }

    /// Queue a dashboard edit to land around the next re-read of `id`.
    pub fn schedule_edit(&self, id: &str, fields: UserFields, timing: EditTiming) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.edits.push(ScheduledEdit {
                id: id.to_string(),
                fields,
                timing,
            });
        }
    }

    /// Make the next store call fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_next = Some(error);
        }
    }

    pub fn get(&self, id: &str) -> Option<DocumentRecord> {
        self.inner.lock().ok()?.rows.get(id).cloned()
    }

    pub fn records(&self) -> BTreeMap<String, DocumentRecord> {
        self.inner
            .lock()
            .map(|inner| inner.rows.clone())
            .unwrap_or_default()
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().ok()?.last_synced
    }

    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn conflict_count(&self) -> u32 {
        self.conflicts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Transient("memory store poisoned".to_string()))?;
        match inner.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(inner),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn apply_edits(&mut self, id: &str, timing: EditTiming) {
        let (due, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.edits)
            .into_iter()
            .partition(|edit| edit.id == id && edit.timing == timing);
        self.edits = rest;
        for edit in due {
            if let Some(row) = self.rows.get_mut(&edit.id) {
                row.apply_user_fields(&edit.fields);
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn id(&self) -> &str {
        "memory"
    }

    async fn read_all(&self) -> Result<StoreSnapshot, StoreError> {
        let inner = self.lock()?;
        Ok(StoreSnapshot {
            records: inner.rows.clone(),
            malformed: Vec::new(),
        })
    }

    async fn read_row(&self, id: &str) -> Result<Option<DocumentRecord>, StoreError> {
        let mut inner = self.lock()?;
        inner.apply_edits(id, EditTiming::BeforeReread);
        let row = inner.rows.get(id).cloned();
        inner.apply_edits(id, EditTiming::AfterReread);
        Ok(row)
    }

    async fn upsert(
        &self,
        record: &DocumentRecord,
        expected: Option<&UserFields>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let current = inner.rows.get(&record.id).map(DocumentRecord::user_fields);

        if current.as_ref() != expected {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::Conflict {
                id: record.id.clone(),
                current,
            });
        }

        match inner.rows.get_mut(&record.id) {
            Some(row) => row.merge_sync_fields(record),
            None => {
                inner.rows.insert(record.id.clone(), record.clone());
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_synced(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.last_synced = Some(at);
        Ok(())
    }
}
