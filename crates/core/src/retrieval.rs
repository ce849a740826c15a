use crate::embeddings::{ensure_dimension, Embedder};
use crate::extractor::DocumentReader;
use crate::models::CaseMatch;
use crate::store::VectorStore;
use crate::SearchError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Query side of a logical index: one reader, one pinned embedder, one store.
#[derive(Clone)]
pub struct CaseFinder {
    reader: Arc<dyn DocumentReader>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    max_embed_chars: usize,
}

impl CaseFinder {
    pub fn new(
        reader: Arc<dyn DocumentReader>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self, SearchError> {
        if embedder.dimensions() != store.dimension() {
            return Err(SearchError::DimensionMismatch {
                expected: store.dimension(),
                actual: embedder.dimensions(),
            });
        }

        Ok(Self {
            reader,
            embedder,
            store,
            max_embed_chars: crate::IndexingOptions::default().max_embed_chars,
        })
    }

    pub fn with_max_embed_chars(mut self, max_embed_chars: usize) -> Self {
        self.max_embed_chars = max_embed_chars.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Extracts `path` the same way the indexer does and returns its
    /// nearest cases.
    pub async fn find_similar_file(&self, path: &Path, top_k: usize) -> Result<Vec<CaseMatch>, SearchError> {
        let reader = self.reader.clone();
        let owned: PathBuf = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || reader.read_text(&owned))
            .await
            .map_err(|error| SearchError::Request(format!("extraction task failed: {error}")))?;

        if text.trim().is_empty() {
            return Err(SearchError::EmptyDocument(path.display().to_string()));
        }
        self.find_similar_text(&text, top_k).await
    }

    pub async fn find_similar_text(&self, text: &str, top_k: usize) -> Result<Vec<CaseMatch>, SearchError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(SearchError::EmptyDocument("query text".to_string()));
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let embedder = self.embedder.clone();
        let query = crate::preview::leading_chars(trimmed, self.max_embed_chars).to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&query))
            .await
            .map_err(|error| SearchError::Embedding(format!("embedding task failed: {error}")))??;
        ensure_dimension(&vector, self.store.dimension())?;

        let matches = self.store.query(&vector, top_k).await?;
        debug!(returned = matches.len(), top_k, "similarity query");

        let ranked = rerank(self.same_model_only(matches)?);
        if let Some(best) = ranked.first() {
            info!(top = %best.id, score = best.score, results = ranked.len(), "found similar cases");
        }
        Ok(ranked)
    }
}

impl CaseFinder {
    /// Drops matches embedded with a different model than the query. Entries
    /// with no recorded model are kept. If every match came from another
    /// model the index is not comparable at all, which is an error.
    fn same_model_only(&self, matches: Vec<CaseMatch>) -> Result<Vec<CaseMatch>, SearchError> {
        let model = self.embedder.model();
        let returned = matches.len();
        let mut foreign = None;

        let kept = matches
            .into_iter()
            .filter(|hit| match hit.metadata.model.as_deref() {
                Some(other) if other != model => {
                    foreign.get_or_insert_with(|| other.to_string());
                    false
                }
                _ => true,
            })
            .collect::<Vec<_>>();

        match foreign {
            Some(found) if kept.is_empty() => Err(SearchError::ModelMismatch {
                expected: model.to_string(),
                found,
            }),
            Some(found) => {
                warn!(
                    model,
                    other = %found,
                    dropped = returned - kept.len(),
                    "ignored matches embedded with another model"
                );
                Ok(kept)
            }
            None => Ok(kept),
        }
    }
}

/// Descending by score. Stable for ties; NaN scores sink to the end.
pub fn rerank(mut matches: Vec<CaseMatch>) -> Vec<CaseMatch> {
    matches.sort_by(|left, right| match (left.score.is_nan(), right.score.is_nan()) {
        (false, false) => right.score.total_cmp(&left.score),
        (left_nan, right_nan) => left_nan.cmp(&right_nan),
    });
    matches
}
