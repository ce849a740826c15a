use crate::chunking::ChunkingConfig;
use crate::ids::IdScheme;
use crate::preview;
use crate::store::MAX_UPSERT_BATCH;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Metadata attached to every vector-store entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CaseMetadata {
    #[serde(default)]
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_index"
    )]
    pub chunk_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Embedding model that produced the vector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub court: Option<String>,
}

/// Stores hand numbers back as floats (`3.0`), so accept any non-negative number.
fn lenient_index<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| {
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|n| *n >= 0.0).map(|n| n as u64))
    }))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: CaseMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: CaseMetadata,
}

impl CaseMatch {
    /// Decoded text preview, if the entry carries a readable one.
    pub fn preview(&self) -> Option<String> {
        self.metadata
            .text_preview
            .as_deref()
            .and_then(|encoded| preview::decode_preview(encoded).ok())
    }

    pub fn display_name(&self) -> &str {
        if self.metadata.filename.is_empty() {
            &self.id
        } else {
            &self.metadata.filename
        }
    }
}

/// One page of ids returned by a paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdPage {
    pub ids: Vec<String>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub dimension: usize,
    pub total_vector_count: u64,
}

#[derive(Debug, Clone)]
pub struct IndexingOptions {
    pub chunked: bool,
    pub batch_size: usize,
    pub id_scheme: IdScheme,
    pub workers: usize,
    pub min_chars: usize,
    pub preview_chars: usize,
    pub max_embed_chars: usize,
    pub chunking: ChunkingConfig,
    pub show_progress: bool,
}

impl IndexingOptions {
    /// `batch_size`, capped at what one upsert call accepts.
    pub fn upsert_batch_size(&self) -> usize {
        self.batch_size.min(MAX_UPSERT_BATCH)
    }
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            chunked: false,
            batch_size: 100,
            id_scheme: IdScheme::default(),
            workers: 8,
            min_chars: 50,
            preview_chars: 3_000,
            max_embed_chars: 8_000,
            chunking: ChunkingConfig::default(),
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ReindexReport {
    pub discovered: usize,
    pub indexed: usize,
    pub vectors: usize,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub interrupted: bool,
    /// Leftover chunk entries of re-indexed documents that were deleted.
    pub stale_removed: usize,
    pub skipped_files: Vec<SkippedPdf>,
}

#[derive(Debug, Clone)]
pub struct CleanupOptions {
    pub id_scheme: IdScheme,
    pub delete_batch_size: usize,
    pub dry_run: bool,
}

impl Default for CleanupOptions {
    fn default() -> Self {
        Self {
            id_scheme: IdScheme::default(),
            delete_batch_size: 100,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub local: usize,
    pub remote: usize,
    pub deleted: usize,
    pub deleted_ids: Vec<String>,
    pub dry_run: bool,
}
