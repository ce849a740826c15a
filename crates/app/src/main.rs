mod server;

use case_search_core::config::{
    DEFAULT_API_VERSION, DEFAULT_CLOUD, DEFAULT_CONTROLLER_URL, DEFAULT_INDEX_NAME, DEFAULT_MODEL,
    DEFAULT_REGION,
};
use case_search_core::{
    cleanup, CaseFinder, ChunkingConfig, CleanupOptions, DocumentReader, Embedder,
    EmbeddingSettings, HashingEmbedder, HttpOcr, IdScheme, IndexingOptions, LopdfExtractor,
    OcrEndpointConfig, OcrEngine, PineconeEmbedder, PineconeStore, Reindexer, RetryPolicy,
    StoreSettings, TesseractOcr, TextExtractor, VectorStore,
};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "case-search", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pinecone API key. Required.
    #[arg(long, env = "PINECONE_API_KEY", hide_env_values = true)]
    pinecone_api_key: Option<String>,

    /// Pinecone index name
    #[arg(long, env = "PINECONE_INDEX", default_value = DEFAULT_INDEX_NAME)]
    index: String,

    /// Data-plane host of the index; looked up by name when omitted
    #[arg(long, env = "PINECONE_INDEX_HOST")]
    index_host: Option<String>,

    /// Pinecone control-plane URL
    #[arg(long, env = "PINECONE_CONTROLLER_URL", default_value = DEFAULT_CONTROLLER_URL)]
    controller_url: String,

    /// Serverless cloud for a newly created index
    #[arg(long, env = "PINECONE_CLOUD", default_value = DEFAULT_CLOUD)]
    cloud: String,

    /// Serverless region for a newly created index
    #[arg(long, env = "PINECONE_REGION", default_value = DEFAULT_REGION)]
    region: String,

    /// Embedding model pinned to the index
    #[arg(long, env = "MODEL_NAME", default_value = DEFAULT_MODEL)]
    model: String,

    /// Output dimension of the embedding model
    #[arg(long, env = "EMBEDDING_DIMENSION", default_value_t = 1024)]
    dimension: usize,

    #[arg(long, env = "EMBEDDING_BACKEND", value_enum, default_value_t = EmbeddingBackend::Pinecone)]
    embedding_backend: EmbeddingBackend,

    #[arg(long, env = "OCR_BACKEND", value_enum, default_value_t = OcrBackend::Tesseract)]
    ocr_backend: OcrBackend,

    /// Attempts per store call before giving up
    #[arg(long, env = "STORE_MAX_ATTEMPTS", default_value_t = 3)]
    store_attempts: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbeddingBackend {
    /// Pinecone hosted inference
    Pinecone,
    /// Local character-trigram hashing
    Hashing,
}

#[derive(Clone, Copy, ValueEnum)]
enum OcrBackend {
    /// pdftoppm + tesseract
    Tesseract,
    /// OCR_ENDPOINT service
    Http,
    None,
}

#[derive(Subcommand)]
enum Command {
    /// Index every PDF under a directory.
    Reindex {
        /// Corpus root, searched recursively.
        #[arg(long, env = "CORPUS_ROOT")]
        root: PathBuf,
        /// Embed sentence-bounded passages instead of whole documents.
        #[arg(long, default_value_t = false)]
        chunked: bool,
        #[arg(long, default_value = "600")]
        chunk_chars: usize,
        #[arg(long, default_value = "100")]
        batch_size: usize,
        #[arg(long, default_value = "8")]
        workers: usize,
        #[arg(long, default_value_t = IdScheme::RelativePath)]
        id_scheme: IdScheme,
        /// Files with fewer readable characters are skipped.
        #[arg(long, default_value = "50")]
        min_chars: usize,
        #[arg(long, default_value_t = false)]
        no_progress: bool,
    },
    /// Delete index entries whose PDF no longer exists locally.
    Cleanup {
        #[arg(long, env = "CORPUS_ROOT")]
        root: PathBuf,
        #[arg(long, default_value_t = IdScheme::RelativePath)]
        id_scheme: IdScheme,
        #[arg(long, default_value = "100")]
        batch_size: usize,
        /// Report stale ids without deleting them.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Find the cases most similar to a PDF.
    Search {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Print the stored text preview of each match.
        #[arg(long, default_value_t = false)]
        preview: bool,
    },
    /// Serve the upload-and-match HTTP API.
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:5000")]
        bind: SocketAddr,
        #[arg(long, env = "UPLOAD_DIR", default_value = "uploads/user_uploads")]
        upload_dir: PathBuf,
        #[arg(long, default_value = "5")]
        top_k: usize,
    },
}

impl Cli {
    fn store_settings(&self) -> anyhow::Result<StoreSettings> {
        let mut settings = StoreSettings::new(
            self.pinecone_api_key.clone().unwrap_or_default(),
            &self.index,
        );
        settings.controller_url = self.controller_url.clone();
        settings.index_host = self.index_host.clone().filter(|host| !host.trim().is_empty());
        settings.api_version = DEFAULT_API_VERSION.to_string();
        settings.cloud = self.cloud.clone();
        settings.region = self.region.clone();
        settings.retry = RetryPolicy {
            max_attempts: self.store_attempts.max(1),
            ..RetryPolicy::default()
        };
        settings.validate()?;
        Ok(settings)
    }

    fn embedder(&self, api_key: &str) -> anyhow::Result<Arc<dyn Embedder>> {
        let settings = EmbeddingSettings {
            model: self.model.clone(),
            dimension: self.dimension,
            controller_url: self.controller_url.clone(),
            ..EmbeddingSettings::default()
        };
        settings.validate()?;

        let embedder: Arc<dyn Embedder> = match self.embedding_backend {
            EmbeddingBackend::Pinecone => Arc::new(PineconeEmbedder::new(&settings, api_key)?),
            EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(settings.dimension)),
        };
        Ok(embedder)
    }

    fn reader(&self) -> Arc<dyn DocumentReader> {
        let ocr: Option<Box<dyn OcrEngine>> = match self.ocr_backend {
            OcrBackend::Tesseract => Some(Box::new(TesseractOcr::default())),
            OcrBackend::Http => match OcrEndpointConfig::from_env() {
                Some(config) => Some(Box::new(HttpOcr::new(config))),
                None => {
                    warn!("OCR_BACKEND=http but OCR_ENDPOINT is unset, OCR disabled");
                    None
                }
            },
            OcrBackend::None => None,
        };
        Arc::new(TextExtractor::new(Box::new(LopdfExtractor), ocr))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "case-search boot"
    );

    let settings = cli.store_settings()?;
    let embedder = cli.embedder(&settings.api_key)?;
    let reader = cli.reader();
    if matches!(cli.command, Command::Reindex { .. }) && settings.index_host.is_none() {
        PineconeStore::ensure_index(&settings, embedder.dimensions()).await?;
    }
    let store: Arc<dyn VectorStore> = Arc::new(PineconeStore::connect(&settings).await?);
    info!(
        index = %settings.index_name,
        model = embedder.model(),
        dimension = embedder.dimensions(),
        "pinned embedding model"
    );

    match cli.command {
        Command::Reindex {
            root,
            chunked,
            chunk_chars,
            batch_size,
            workers,
            id_scheme,
            min_chars,
            no_progress,
        } => {
            let options = IndexingOptions {
                chunked,
                batch_size,
                id_scheme,
                workers,
                min_chars,
                chunking: ChunkingConfig {
                    max_chars: chunk_chars,
                    ..ChunkingConfig::default()
                },
                show_progress: !no_progress,
                ..IndexingOptions::default()
            };

            println!("found corpus at {}, indexing...", root.display());
            let report = Reindexer::new(reader, embedder, store, options)
                .reindex_until(&root, async {
                    if tokio::signal::ctrl_c().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                })
                .await?;

            println!("===============================");
            if report.interrupted {
                println!("reindex interrupted after {:.2} sec", report.elapsed.as_secs_f64());
            } else {
                println!("reindex completed in {:.2} sec", report.elapsed.as_secs_f64());
            }
            println!("pdfs found: {}", report.discovered);
            println!("indexed: {} ({} vectors)", report.indexed, report.vectors);
            println!("skipped (no text): {}", report.skipped);
            println!("failed: {}", report.failed);
            println!("leftover chunks removed: {}", report.stale_removed);
            println!("===============================");
        }
        Command::Cleanup {
            root,
            id_scheme,
            batch_size,
            dry_run,
        } => {
            let options = CleanupOptions {
                id_scheme,
                delete_batch_size: batch_size,
                dry_run,
            };
            let report = cleanup(&root, store.as_ref(), &options).await?;

            println!("local pdfs: {}", report.local);
            println!("index entries: {}", report.remote);
            if report.dry_run {
                println!("would delete {} entries:", report.deleted_ids.len());
                for id in &report.deleted_ids {
                    println!("  {id}");
                }
            } else if report.deleted == 0 {
                println!("index is in sync with {}", root.display());
            } else {
                println!("deleted {} entries missing locally", report.deleted);
            }
        }
        Command::Search {
            file,
            top_k,
            preview,
        } => {
            let finder = CaseFinder::new(reader, embedder, store)?;
            let matches = finder.find_similar_file(&file, top_k).await?;

            if matches.is_empty() {
                println!("no similar cases found");
            }
            for (rank, hit) in matches.iter().enumerate() {
                println!("[{}] {} score={:.4} id={}", rank + 1, hit.display_name(), hit.score, hit.id);
                if let Some(path) = &hit.metadata.local_path {
                    println!("  path={path}");
                }
                if preview {
                    if let Some(text) = hit.preview() {
                        let excerpt = case_search_core::preview::leading_chars(&text, 1_000);
                        println!("  preview:\n{excerpt}");
                    }
                }
            }
        }
        Command::Serve {
            bind,
            upload_dir,
            top_k,
        } => {
            let finder = CaseFinder::new(reader, embedder, store)?;
            server::serve(server::AppState::new(finder, upload_dir, top_k), bind).await?;
        }
    }

    Ok(())
}
