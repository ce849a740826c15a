use crate::error::IngestError;
use crate::retry::RetryPolicy;

pub const DEFAULT_CONTROLLER_URL: &str = "https://api.pinecone.io";
pub const DEFAULT_API_VERSION: &str = "2025-01";
pub const DEFAULT_INDEX_NAME: &str = "legal-cases";
pub const DEFAULT_MODEL: &str = "llama-text-embed-v2";
pub const DEFAULT_CLOUD: &str = "aws";
pub const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for one logical Pinecone index.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub api_key: String,
    pub index_name: String,
    pub controller_url: String,
    /// Data-plane host; looked up from the controller when absent.
    pub index_host: Option<String>,
    pub api_version: String,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
    /// Serverless placement used when the index has to be created.
    pub cloud: String,
    pub region: String,
}

impl StoreSettings {
    pub fn new(api_key: impl Into<String>, index_name: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            index_name: index_name.into(),
            controller_url: DEFAULT_CONTROLLER_URL.to_string(),
            index_host: None,
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout_secs: 30,
            retry: RetryPolicy::default(),
            cloud: DEFAULT_CLOUD.to_string(),
            region: DEFAULT_REGION.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.api_key.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "PINECONE_API_KEY is missing or blank".to_string(),
            ));
        }
        if self.index_name.trim().is_empty() {
            return Err(IngestError::InvalidConfig("index name is blank".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(IngestError::InvalidConfig("timeout must be positive".to_string()));
        }
        Ok(())
    }
}

/// The embedding model pinned to a logical index. Index time and query time
/// must use the same settings.
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub model: String,
    pub dimension: usize,
    pub controller_url: String,
    pub api_version: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            dimension: 1024,
            controller_url: DEFAULT_CONTROLLER_URL.to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            timeout_secs: 60,
        }
    }
}

impl EmbeddingSettings {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.model.trim().is_empty() {
            return Err(IngestError::InvalidConfig("MODEL_NAME is blank".to_string()));
        }
        if self.dimension == 0 {
            return Err(IngestError::InvalidConfig(
                "embedding dimension must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
