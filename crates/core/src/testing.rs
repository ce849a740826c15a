//! Fakes shared by the unit tests.

use crate::error::SearchError;
use crate::extractor::DocumentReader;
use crate::models::{CaseMatch, IdPage, StoreStats, VectorRecord};
use crate::stores::MemoryStore;
use crate::store::VectorStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;

/// Treats every "pdf" as a UTF-8 text file.
pub struct PlainTextReader;

impl DocumentReader for PlainTextReader {
    fn read_text(&self, path: &Path) -> String {
        std::fs::read(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
            .unwrap_or_default()
    }
}

pub fn case_text(topic: &str) -> String {
    format!(
        "In the matter of {topic}. The petitioner approached the court seeking relief. \
         After hearing both sides the bench delivered its judgment on {topic}."
    )
}

/// Memory store that records every upsert and delete call.
pub struct RecordingStore {
    pub inner: MemoryStore,
    pub upsert_sizes: Mutex<Vec<usize>>,
    pub delete_sizes: Mutex<Vec<usize>>,
    pub fail_listing: bool,
}

impl RecordingStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: MemoryStore::new(dimension).with_page_size(2),
            upsert_sizes: Mutex::new(Vec::new()),
            delete_sizes: Mutex::new(Vec::new()),
            fail_listing: false,
        }
    }

    pub fn failing_listing(dimension: usize) -> Self {
        Self {
            fail_listing: true,
            ..Self::new(dimension)
        }
    }
}

#[async_trait]
impl VectorStore for RecordingStore {
    fn backend(&self) -> &str {
        "recording"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), SearchError> {
        self.upsert_sizes.lock().push(records.len());
        self.inner.upsert(records).await
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<CaseMatch>, SearchError> {
        self.inner.query(vector, top_k).await
    }

    async fn delete(&self, ids: &[String]) -> Result<(), SearchError> {
        self.delete_sizes.lock().push(ids.len());
        self.inner.delete(ids).await
    }

    async fn list_ids_page(&self, token: Option<String>) -> Result<IdPage, SearchError> {
        if self.fail_listing && token.is_some() {
            return Err(SearchError::StoreUnavailable {
                backend: "recording".to_string(),
                details: "listing timed out".to_string(),
            });
        }
        self.inner.list_ids_page(token).await
    }

    async fn stats(&self) -> Result<StoreStats, SearchError> {
        self.inner.stats().await
    }
}
