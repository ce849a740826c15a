use crate::config::EmbeddingSettings;
use crate::error::SearchError;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 384;

/// Pinecone's inference API accepts at most this many inputs per call.
const PINECONE_MAX_INPUTS: usize = 96;

/// Text to vector. Implementations are blocking and are called from worker
/// threads, never directly on the async runtime.
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError>;

    fn embed(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| SearchError::Embedding(format!("{} returned no vector", self.model())))
    }
}

pub fn ensure_dimension(vector: &[f32], expected: usize) -> Result<(), SearchError> {
    if vector.len() != expected {
        return Err(SearchError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// Deterministic character-trigram hashing embedder. Needs no model download
/// or network, which makes it suitable for offline corpora and tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model: format!("char-trigram-hash-{dimensions}"),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIMENSIONS)
    }
}

impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    parameters: EmbedParameters,
    inputs: Vec<EmbedInput<'a>>,
}

#[derive(Debug, Serialize)]
struct EmbedParameters {
    input_type: &'static str,
    truncate: &'static str,
}

#[derive(Debug, Serialize)]
struct EmbedInput<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    data: Vec<EmbedData>,
}

#[derive(Debug, Deserialize)]
struct EmbedData {
    #[serde(default)]
    values: Vec<f32>,
}

/// Pinecone hosted inference (`POST /embed`).
///
/// The blocking HTTP client is built on first use, from the worker thread
/// that embeds, so constructing or dropping the embedder on the async
/// runtime never blocks it.
pub struct PineconeEmbedder {
    client: OnceLock<Client>,
    timeout: Duration,
    endpoint: String,
    api_key: String,
    api_version: String,
    model: String,
    dimensions: usize,
}

impl PineconeEmbedder {
    pub fn new(settings: &EmbeddingSettings, api_key: impl Into<String>) -> Result<Self, SearchError> {
        let endpoint = format!("{}/embed", settings.controller_url.trim_end_matches('/'));
        url::Url::parse(&endpoint)?;

        Ok(Self {
            client: OnceLock::new(),
            timeout: Duration::from_secs(settings.timeout_secs),
            endpoint,
            api_key: api_key.into(),
            api_version: settings.api_version.clone(),
            model: settings.model.clone(),
            dimensions: settings.dimension,
        })
    }

    fn client(&self) -> Result<&Client, SearchError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|error| SearchError::Embedding(error.to_string()))?;
        Ok(self.client.get_or_init(|| client))
    }

    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let request = EmbedRequest {
            model: &self.model,
            parameters: EmbedParameters {
                input_type: "passage",
                truncate: "END",
            },
            inputs: texts
                .iter()
                .map(|text| EmbedInput { text: text.as_str() })
                .collect(),
        };

        let response = self
            .client()?
            .post(&self.endpoint)
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", &self.api_version)
            .json(&request)
            .send()
            .map_err(|error| SearchError::Embedding(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SearchError::Embedding(format!(
                "{} returned {status}: {body}",
                self.endpoint
            )));
        }

        let payload: EmbedResponse = response
            .json()
            .map_err(|error| SearchError::Embedding(error.to_string()))?;

        if payload.data.len() != texts.len() {
            return Err(SearchError::Embedding(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                payload.data.len()
            )));
        }

        let vectors = payload.data.into_iter().map(|item| item.values).collect::<Vec<_>>();
        for vector in &vectors {
            ensure_dimension(vector, self.dimensions)?;
        }

        Ok(vectors)
    }
}

impl Embedder for PineconeEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SearchError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(PINECONE_MAX_INPUTS) {
            vectors.extend(self.embed_chunk(chunk)?);
        }
        Ok(vectors)
    }
}
