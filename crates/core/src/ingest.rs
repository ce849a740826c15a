use crate::cleanup::MAX_DELETE_BATCH;
use crate::embeddings::{ensure_dimension, Embedder};
use crate::extractor::DocumentReader;
use crate::ids::{chunk_id, chunk_index_of, document_id, document_id_of, parent_folder_name};
use crate::models::{CaseMetadata, IndexingOptions, ReindexReport, SkippedPdf, VectorRecord};
use crate::preview::{encode_preview, leading_chars};
use crate::store::{list_all_ids, pinned_model, VectorStore};
use crate::{chunking, IngestError, SearchError};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .follow_links(true)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

enum FileOutcome {
    Indexed {
        document_id: String,
        chunked: bool,
        records: Vec<VectorRecord>,
    },
    Skipped(SkippedPdf),
    Failed(SkippedPdf),
}

/// Everything one worker needs to turn a file into records.
#[derive(Clone)]
struct FileJob {
    root: PathBuf,
    reader: Arc<dyn DocumentReader>,
    embedder: Arc<dyn Embedder>,
    options: Arc<IndexingOptions>,
    dimension: usize,
}

impl FileJob {
    /// Per-file problems become `Failed`. Only a dimension mismatch, which
    /// would poison every record, is returned as an error.
    fn run(&self, path: PathBuf) -> Result<FileOutcome, IngestError> {
        match self.process(&path) {
            Err(error @ IngestError::Search(SearchError::DimensionMismatch { .. })) => Err(error),
            Err(error) => Ok(FileOutcome::Failed(SkippedPdf {
                path,
                reason: error.to_string(),
            })),
            outcome => outcome,
        }
    }

    fn process(&self, path: &Path) -> Result<FileOutcome, IngestError> {
        let path = path.to_path_buf();
        let text = self.reader.read_text(&path);
        let readable = text.trim().chars().count();
        if readable < self.options.min_chars {
            return Ok(FileOutcome::Skipped(SkippedPdf {
                reason: format!(
                    "only {readable} readable characters (minimum {})",
                    self.options.min_chars
                ),
                path,
            }));
        }

        let base_id = document_id(&self.root, &path, self.options.id_scheme)?;
        let passages = if self.options.chunked {
            chunking::chunk(&text, self.options.chunking)
        } else {
            vec![leading_chars(text.trim(), self.options.max_embed_chars).to_string()]
        };

        let vectors = match self.embedder.embed_batch(&passages) {
            Ok(vectors) => vectors,
            Err(error @ SearchError::DimensionMismatch { .. }) => return Err(error.into()),
            Err(error) => {
                return Ok(FileOutcome::Failed(SkippedPdf {
                    path,
                    reason: error.to_string(),
                }))
            }
        };
        if vectors.len() != passages.len() {
            return Ok(FileOutcome::Failed(SkippedPdf {
                reason: format!(
                    "embedder returned {} vectors for {} passages",
                    vectors.len(),
                    passages.len()
                ),
                path,
            }));
        }
        for vector in &vectors {
            ensure_dimension(vector, self.dimension)?;
        }

        let metadata = self.base_metadata(&path, &text)?;
        let records = passages
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(index, (passage, values))| {
                if self.options.chunked {
                    let mut metadata = metadata.clone();
                    metadata.chunk_index = Some(index as u64);
                    metadata.text = Some(passage);
                    if index > 0 {
                        metadata.text_preview = None;
                    }
                    VectorRecord {
                        id: chunk_id(&base_id, index),
                        values,
                        metadata,
                    }
                } else {
                    VectorRecord {
                        id: base_id.clone(),
                        values,
                        metadata: metadata.clone(),
                    }
                }
            })
            .collect();

        Ok(FileOutcome::Indexed {
            document_id: base_id,
            chunked: self.options.chunked,
            records,
        })
    }

    fn base_metadata(&self, path: &Path, text: &str) -> Result<CaseMetadata, IngestError> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;

        Ok(CaseMetadata {
            filename,
            text_preview: Some(encode_preview(text.trim(), self.options.preview_chars)?),
            local_path: Some(path.to_string_lossy().replace('\\', "/")),
            folder: parent_folder_name(path),
            checksum: Some(digest_file(path)?),
            model: Some(self.embedder.model().to_string()),
            indexed_at: Some(Utc::now().to_rfc3339()),
            ..CaseMetadata::default()
        })
    }
}

/// Walks a corpus and keeps a vector store in step with it.
pub struct Reindexer {
    reader: Arc<dyn DocumentReader>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    options: IndexingOptions,
}

impl Reindexer {
    pub fn new(
        reader: Arc<dyn DocumentReader>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        options: IndexingOptions,
    ) -> Self {
        Self {
            reader,
            embedder,
            store,
            options,
        }
    }

    pub fn options(&self) -> &IndexingOptions {
        &self.options
    }

    pub async fn reindex(&self, root: &Path) -> Result<ReindexReport, IngestError> {
        self.reindex_until(root, std::future::pending()).await
    }

    /// Like [`Reindexer::reindex`], but stops taking results once `shutdown`
    /// resolves. The partial batch is still flushed.
    pub async fn reindex_until<F>(&self, root: &Path, shutdown: F) -> Result<ReindexReport, IngestError>
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();

        if !root.is_dir() {
            return Err(IngestError::InvalidArgument(format!(
                "corpus root is not a directory: {}",
                root.display()
            )));
        }
        if self.options.batch_size == 0 {
            return Err(IngestError::InvalidConfig("batch size must be positive".to_string()));
        }

        let dimension = self.store.dimension();
        if self.embedder.dimensions() != dimension {
            return Err(SearchError::DimensionMismatch {
                expected: dimension,
                actual: self.embedder.dimensions(),
            }
            .into());
        }
        if let Some(found) = pinned_model(self.store.as_ref()).await? {
            if found != self.embedder.model() {
                return Err(SearchError::ModelMismatch {
                    expected: self.embedder.model().to_string(),
                    found,
                }
                .into());
            }
        }

        let batch_size = self.options.upsert_batch_size();
        if batch_size < self.options.batch_size {
            warn!(
                requested = self.options.batch_size,
                batch_size, "batch size capped at the store's upsert limit"
            );
        }

        let files = discover_pdf_files(root);
        let mut report = ReindexReport {
            discovered: files.len(),
            ..ReindexReport::default()
        };
        info!(
            root = %root.display(),
            files = files.len(),
            model = self.embedder.model(),
            backend = self.store.backend(),
            chunked = self.options.chunked,
            batch_size,
            id_scheme = %self.options.id_scheme,
            "starting reindex"
        );

        let progress = self.progress_bar(files.len());
        let job = FileJob {
            root: root.to_path_buf(),
            reader: self.reader.clone(),
            embedder: self.embedder.clone(),
            options: Arc::new(self.options.clone()),
            dimension,
        };

        let mut results = stream::iter(files)
            .map(|path| {
                let job = job.clone();
                async move {
                    let worker_path = path.clone();
                    match tokio::task::spawn_blocking(move || job.run(worker_path)).await {
                        Ok(outcome) => outcome,
                        Err(error) => Ok(FileOutcome::Failed(SkippedPdf {
                            path,
                            reason: format!("worker aborted: {error}"),
                        })),
                    }
                }
            })
            .buffer_unordered(self.options.workers.max(1));

        tokio::pin!(shutdown);
        let mut batch = Vec::new();
        // Chunk count per written document, `None` when stored whole.
        let mut written: HashMap<String, Option<usize>> = HashMap::new();

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    warn!(pending = batch.len(), "reindex interrupted, flushing partial batch");
                    report.interrupted = true;
                    break;
                }
                next = results.next() => {
                    let Some(outcome) = next else {
                        break;
                    };
                    let outcome = outcome?;
                    progress.inc(1);

                    match outcome {
                        FileOutcome::Indexed {
                            document_id,
                            chunked,
                            records,
                        } => {
                            report.indexed += 1;
                            written.insert(document_id, chunked.then_some(records.len()));
                            batch.extend(records);
                        }
                        FileOutcome::Skipped(skipped) => {
                            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
                            report.skipped += 1;
                            report.skipped_files.push(skipped);
                        }
                        FileOutcome::Failed(failed) => {
                            warn!(path = %failed.path.display(), reason = %failed.reason, "failed to embed pdf");
                            report.failed += 1;
                            report.skipped_files.push(failed);
                        }
                    }

                    while batch.len() >= batch_size {
                        let full = batch.drain(..batch_size).collect::<Vec<_>>();
                        self.flush(&full, &mut report).await?;
                    }
                }
            }
        }

        self.flush(&batch, &mut report).await?;
        progress.finish_and_clear();

        if report.interrupted {
            info!("interrupted run, leftover chunks are removed on the next full run");
        } else if !written.is_empty() {
            report.stale_removed = self.remove_stale_entries(&written).await?;
        }

        report.elapsed = started.elapsed();
        info!(
            indexed = report.indexed,
            vectors = report.vectors,
            skipped = report.skipped,
            failed = report.failed,
            interrupted = report.interrupted,
            stale_removed = report.stale_removed,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "reindex finished"
        );
        Ok(report)
    }

    async fn flush(&self, batch: &[VectorRecord], report: &mut ReindexReport) -> Result<(), IngestError> {
        if batch.is_empty() {
            return Ok(());
        }

        self.store.upsert(batch).await?;
        report.vectors += batch.len();
        debug!(records = batch.len(), total = report.vectors, "flushed batch");
        Ok(())
    }

    /// Deletes entries a re-indexed document no longer produces: chunks past
    /// its new chunk count, chunks of a document now stored whole, and the
    /// whole-document entry of one now stored as chunks.
    async fn remove_stale_entries(
        &self,
        written: &HashMap<String, Option<usize>>,
    ) -> Result<usize, IngestError> {
        let stale = list_all_ids(self.store.as_ref())
            .await?
            .into_iter()
            .filter(|id| is_stale(id, written))
            .collect::<Vec<_>>();

        for batch in stale.chunks(MAX_DELETE_BATCH) {
            self.store.delete(batch).await?;
        }
        if !stale.is_empty() {
            info!(removed = stale.len(), "removed leftover entries of re-indexed documents");
        }
        Ok(stale.len())
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }

        let progress = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pdfs ({percent}%) {msg}")
        {
            progress.set_style(style.progress_chars("#>-"));
        }
        progress
    }
}

fn is_stale(id: &str, written: &HashMap<String, Option<usize>>) -> bool {
    if let Some(chunks) = written.get(id) {
        return chunks.is_some();
    }
    match chunk_index_of(id) {
        Some(index) => match written.get(document_id_of(id)) {
            Some(Some(chunks)) => index >= *chunks,
            Some(None) => true,
            None => false,
        },
        None => false,
    }
}
