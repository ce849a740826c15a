use crate::error::SearchError;
use crate::models::{CaseMatch, IdPage, StoreStats, VectorRecord};
use async_trait::async_trait;

/// Pinecone accepts at most this many vectors per upsert call.
pub const MAX_UPSERT_BATCH: usize = 1_000;

/// Entries sampled when reading the model an index was built with.
const MODEL_SAMPLE: usize = 10;

/// A managed vector index keyed by string ids. Upserting an existing id
/// overwrites it.
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn backend(&self) -> &str;

    /// Dimension every stored and queried vector must have.
    fn dimension(&self) -> usize;

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), SearchError>;

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<CaseMatch>, SearchError>;

    async fn delete(&self, ids: &[String]) -> Result<(), SearchError>;

    /// One page of ids; pass the previous page's `next_token` to continue.
    async fn list_ids_page(&self, token: Option<String>) -> Result<IdPage, SearchError>;

    async fn stats(&self) -> Result<StoreStats, SearchError>;
}

/// Follows pagination until the store reports no further page.
pub async fn list_all_ids(store: &dyn VectorStore) -> Result<Vec<String>, SearchError> {
    let mut ids = Vec::new();
    let mut token = None;

    loop {
        let page = store.list_ids_page(token.take()).await?;
        ids.extend(page.ids);

        match page.next_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => break,
        }
    }

    Ok(ids)
}

/// The embedding model recorded on existing entries, if any carry one.
///
/// Samples the nearest entries to a unit vector; an empty index or one
/// written before models were recorded yields `None`.
pub async fn pinned_model(store: &dyn VectorStore) -> Result<Option<String>, SearchError> {
    let dimension = store.dimension();
    if dimension == 0 {
        return Ok(None);
    }

    let mut unit = vec![0.0; dimension];
    unit[0] = 1.0;
    let sample = store.query(&unit, MODEL_SAMPLE).await?;
    Ok(sample.into_iter().find_map(|hit| hit.metadata.model))
}
