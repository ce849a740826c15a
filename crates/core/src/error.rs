use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error(transparent)]
    Search(#[from] SearchError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("no readable text in {0}")]
    EmptyDocument(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("{backend} unavailable: {details}")]
    StoreUnavailable { backend: String, details: String },

    #[error("{backend} rejected request ({status}): {details}")]
    StoreRejected {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("embedding dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index was built with model `{found}`, but `{expected}` is configured")]
    ModelMismatch { expected: String, found: String },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),
}

impl SearchError {
    /// Only transient backend failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SearchError::StoreUnavailable { .. })
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
