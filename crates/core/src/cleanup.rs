use crate::ids::{document_id, document_id_of};
use crate::ingest::discover_pdf_files;
use crate::models::{CleanupOptions, CleanupReport};
use crate::store::{list_all_ids, VectorStore};
use crate::IngestError;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Store limits deletes to this many ids per call.
pub const MAX_DELETE_BATCH: usize = 100;

/// Document ids the local corpus implies under `options.id_scheme`.
pub fn local_document_ids(root: &Path, options: &CleanupOptions) -> Result<HashSet<String>, IngestError> {
    if !root.is_dir() {
        return Err(IngestError::InvalidArgument(format!(
            "corpus root is not a directory: {}",
            root.display()
        )));
    }

    discover_pdf_files(root)
        .iter()
        .map(|path| document_id(root, path, options.id_scheme))
        .collect()
}

/// Deletes store entries whose source file is gone from `root`.
///
/// Nothing is deleted unless the full id listing succeeds.
pub async fn cleanup(
    root: &Path,
    store: &dyn VectorStore,
    options: &CleanupOptions,
) -> Result<CleanupReport, IngestError> {
    let local = local_document_ids(root, options)?;
    info!(root = %root.display(), local = local.len(), "collected local document ids");

    match store.stats().await {
        Ok(stats) => info!(
            backend = store.backend(),
            total_vectors = stats.total_vector_count,
            "store stats before cleanup"
        ),
        Err(error) => warn!(backend = store.backend(), %error, "could not read store stats"),
    }

    let remote = list_all_ids(store).await?;
    let stale = remote
        .iter()
        .filter(|id| !local.contains(id.as_str()) && !local.contains(document_id_of(id)))
        .cloned()
        .collect::<Vec<_>>();

    let mut report = CleanupReport {
        local: local.len(),
        remote: remote.len(),
        dry_run: options.dry_run,
        ..CleanupReport::default()
    };

    if stale.is_empty() {
        info!(remote = remote.len(), "store already in sync with corpus");
        return Ok(report);
    }

    if options.dry_run {
        info!(stale = stale.len(), "dry run, nothing deleted");
        report.deleted_ids = stale;
        return Ok(report);
    }

    let batch_size = options.delete_batch_size.clamp(1, MAX_DELETE_BATCH);
    for batch in stale.chunks(batch_size) {
        store.delete(batch).await?;
        report.deleted += batch.len();
        report.deleted_ids.extend(batch.iter().cloned());
    }

    info!(deleted = report.deleted, remote = report.remote, "removed stale entries");
    Ok(report)
}
