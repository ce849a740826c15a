//! In-process vector store.
//!
//! Linear-scan cosine search over a `BTreeMap`, so ids list in a stable
//! order. Used for offline runs and as the store behind the test suites.

use crate::embeddings::ensure_dimension;
use crate::error::SearchError;
use crate::models::{CaseMatch, CaseMetadata, IdPage, StoreStats, VectorRecord};
use crate::store::VectorStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

const DEFAULT_PAGE_SIZE: usize = 100;

pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, (Vec<f32>, CaseMetadata)>>,
    dimension: usize,
    page_size: usize,
}

impl MemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            dimension,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn metadata(&self, id: &str) -> Option<CaseMetadata> {
        self.entries.read().get(id).map(|(_, metadata)| metadata.clone())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0f32, 0f32, 0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0)
}

#[async_trait]
impl VectorStore for MemoryStore {
    fn backend(&self) -> &str {
        "memory"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), SearchError> {
        for record in records {
            ensure_dimension(&record.values, self.dimension)?;
        }

        let mut entries = self.entries.write();
        for record in records {
            entries.insert(
                record.id.clone(),
                (record.values.clone(), record.metadata.clone()),
            );
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<CaseMatch>, SearchError> {
        ensure_dimension(vector, self.dimension)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read();
        let mut matches = entries
            .iter()
            .map(|(id, (values, metadata))| CaseMatch {
                id: id.clone(),
                score: cosine_similarity(vector, values),
                metadata: metadata.clone(),
            })
            .collect::<Vec<_>>();

        matches.sort_by(|left, right| right.score.total_cmp(&left.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), SearchError> {
        let mut entries = self.entries.write();
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }

    async fn list_ids_page(&self, token: Option<String>) -> Result<IdPage, SearchError> {
        let offset = match token {
            Some(token) => token.parse::<usize>().map_err(|_| SearchError::Request(format!(
                "invalid pagination token `{token}`"
            )))?,
            None => 0,
        };

        let entries = self.entries.read();
        let ids = entries
            .keys()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect::<Vec<_>>();
        let next = offset + ids.len();
        let next_token = (next < entries.len()).then(|| next.to_string());

        Ok(IdPage { ids, next_token })
    }

    async fn stats(&self) -> Result<StoreStats, SearchError> {
        Ok(StoreStats {
            dimension: self.dimension,
            total_vector_count: self.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::list_all_ids;

    fn record(id: &str, values: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            values,
            metadata: CaseMetadata {
                filename: format!("{id}.pdf"),
                ..CaseMetadata::default()
            },
        }
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_id() {
        let store = MemoryStore::new(2);
        store.upsert(&[record("a", vec![1.0, 0.0])]).await.unwrap();
        store.upsert(&[record("a", vec![0.0, 1.0])]).await.unwrap();

        assert_eq!(store.len(), 1);
        let hits = store.query(&[0.0, 1.0], 1).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn query_orders_by_descending_cosine() {
        let store = MemoryStore::new(2);
        store
            .upsert(&[
                record("far", vec![-1.0, 0.0]),
                record("near", vec![1.0, 0.1]),
                record("mid", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 3).await.unwrap();
        let ids = hits.iter().map(|hit| hit.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["near", "mid", "far"]);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let store = MemoryStore::new(3);
        let error = store.upsert(&[record("a", vec![1.0, 0.0])]).await.unwrap_err();
        assert!(matches!(error, SearchError::DimensionMismatch { expected: 3, actual: 2 }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn listing_follows_every_page() {
        let store = MemoryStore::new(1).with_page_size(2);
        let records = (0..5)
            .map(|index| record(&format!("case-{index}"), vec![1.0]))
            .collect::<Vec<_>>();
        store.upsert(&records).await.unwrap();

        let first = store.list_ids_page(None).await.unwrap();
        assert_eq!(first.ids.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("2"));

        let all = list_all_ids(&store).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all, store.ids());
    }
}
