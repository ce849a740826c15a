pub mod chunking;
pub mod cleanup;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ids;
pub mod ingest;
pub mod models;
pub mod preview;
pub mod retrieval;
pub mod retry;
pub mod store;
pub mod stores;

#[cfg(test)]
mod testing;

pub use chunking::{base_passages, chunk, normalize_whitespace, split_sentences, ChunkingConfig};
pub use cleanup::{cleanup, local_document_ids};
pub use config::{EmbeddingSettings, StoreSettings};
pub use embeddings::{
    ensure_dimension, Embedder, HashingEmbedder, PineconeEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, SearchError};
pub use extractor::{
    DocumentReader, HttpOcr, LopdfExtractor, OcrEndpointConfig, OcrEngine, PageText,
    PdfExtractor, TesseractOcr, TextExtractor,
};
pub use ids::{chunk_id, chunk_index_of, document_id, document_id_of, IdScheme};
pub use ingest::{digest_file, discover_pdf_files, Reindexer};
pub use models::{
    CaseMatch, CaseMetadata, CleanupOptions, CleanupReport, IdPage, IndexingOptions,
    ReindexReport, SkippedPdf, StoreStats, VectorRecord,
};
pub use retrieval::{rerank, CaseFinder};
pub use retry::{with_backoff, RetryPolicy};
pub use store::{list_all_ids, pinned_model, VectorStore, MAX_UPSERT_BATCH};
pub use stores::{MemoryStore, PineconeStore};
