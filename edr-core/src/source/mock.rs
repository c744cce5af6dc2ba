//! Mock document source for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{DocumentSource, FetchError, FolderFilter};
use crate::model::RawDocument;

/// Source with a scripted sequence of results.
///
/// Queued results are returned first, one per call; once the queue is empty
/// every call returns the current document list.
pub struct MockSource {
    source_id: String,
    documents: Mutex<Vec<RawDocument>>,
    scripted: Mutex<VecDeque<Result<Vec<RawDocument>, FetchError>>>,
    delay: Option<Duration>,
    call_count: AtomicU32,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            source_id: "mock-source".to_string(),
            documents: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            delay: None,
            call_count: AtomicU32::new(0),
        }
    }

    pub fn with_documents(self, documents: Vec<RawDocument>) -> Self {
        self.set_documents(documents);
        self
    }

    /// Sleep this long inside every listing call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_documents(&self, documents: Vec<RawDocument>) {
        if let Ok(mut current) = self.documents.lock() {
            *current = documents;
        }
    }

    /// Queue a result for an upcoming call.
    pub fn push_result(&self, result: Result<Vec<RawDocument>, FetchError>) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.push_back(result);
        }
    }

    pub fn push_error(&self, error: FetchError) {
        self.push_result(Err(error));
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentSource for MockSource {
    fn id(&self) -> &str {
        &self.source_id
    }

    async fn list_tracked_documents(
        &self,
        _filter: &FolderFilter,
    ) -> Result<Vec<RawDocument>, FetchError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripted
            .lock()
            .map_err(|_| FetchError::Transient("mock source poisoned".to_string()))?
            .pop_front();
        if let Some(result) = scripted {
            return result;
        }

        self.documents
            .lock()
            .map(|docs| docs.clone())
            .map_err(|_| FetchError::Transient("mock source poisoned".to_string()))
    }
}
