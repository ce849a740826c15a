use crate::config::StoreSettings;
use crate::embeddings::ensure_dimension;
use crate::models::{CaseMatch, CaseMetadata, IdPage, StoreStats, VectorRecord};
use crate::retry::{with_backoff, RetryPolicy};
use crate::store::{VectorStore, MAX_UPSERT_BATCH};
use crate::SearchError;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const BACKEND: &str = "pinecone";
const LIST_PAGE_LIMIT: usize = 100;
/// Upsert requests must stay under Pinecone's 2 MB body limit.
const MAX_UPSERT_BYTES: usize = 2 * 1024 * 1024 - 64 * 1024;
const READY_POLLS: u32 = 60;
const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Pinecone serverless index over its REST data plane.
pub struct PineconeStore {
    client: Client,
    host: Url,
    api_key: String,
    api_version: String,
    dimension: usize,
    retry: RetryPolicy,
}

impl PineconeStore {
    /// Resolves the data-plane host and dimension from the control plane
    /// unless `settings.index_host` is already set.
    pub async fn connect(settings: &StoreSettings) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(unavailable)?;

        let store = match settings.index_host.as_deref() {
            Some(host) => {
                let mut store = Self::with_host(settings, host, 0)?;
                store.client = client;
                let stats = store.stats().await?;
                store.dimension = stats.dimension;
                store
            }
            None => {
                let url = format!(
                    "{}/indexes/{}",
                    settings.controller_url.trim_end_matches('/'),
                    settings.index_name
                );
                let description =
                    control_json(&client, settings, Method::GET, &url, None, "describe_index").await?;

                let (host, dimension) = parse_index_description(&description)?;
                let mut store = Self::with_host(settings, &host, dimension)?;
                store.client = client;
                store
            }
        };

        info!(
            index = %settings.index_name,
            host = %store.host,
            dimension = store.dimension,
            "connected to pinecone index"
        );
        Ok(store)
    }

    /// Creates the serverless index (cosine metric, `dimension`) when the
    /// control plane does not know it, then waits until it reports ready.
    /// Returns whether an index was created.
    pub async fn ensure_index(settings: &StoreSettings, dimension: usize) -> Result<bool, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(unavailable)?;
        let indexes = format!("{}/indexes", settings.controller_url.trim_end_matches('/'));
        let describe = format!("{indexes}/{}", settings.index_name);

        match control_json(&client, settings, Method::GET, &describe, None, "describe_index").await {
            Ok(_) => return Ok(false),
            Err(SearchError::StoreRejected { status: 404, .. }) => {}
            Err(error) => return Err(error),
        }

        info!(
            index = %settings.index_name,
            dimension,
            cloud = %settings.cloud,
            region = %settings.region,
            "creating pinecone index"
        );
        let body = create_index_body(settings, dimension);
        let created =
            control_json(&client, settings, Method::POST, &indexes, Some(&body), "create_index").await;
        match created {
            Ok(_) | Err(SearchError::StoreRejected { status: 409, .. }) => {}
            Err(error) => return Err(error),
        }

        for _ in 0..READY_POLLS {
            let description =
                control_json(&client, settings, Method::GET, &describe, None, "describe_index").await?;
            if index_is_ready(&description) {
                info!(index = %settings.index_name, "pinecone index ready");
                return Ok(true);
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }

        Err(SearchError::StoreUnavailable {
            backend: BACKEND.to_string(),
            details: format!("index {} did not become ready", settings.index_name),
        })
    }

    /// Builds a store for a known host without touching the network.
    pub fn with_host(
        settings: &StoreSettings,
        host: &str,
        dimension: usize,
    ) -> Result<Self, SearchError> {
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            Url::parse(host)?
        } else {
            Url::parse(&format!("https://{host}"))?
        };

        Ok(Self {
            client: Client::new(),
            host,
            api_key: settings.api_key.clone(),
            api_version: settings.api_version.clone(),
            dimension,
            retry: settings.retry,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SearchError> {
        Ok(self.host.join(path)?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", &self.api_version)
    }

    async fn post_json(&self, path: &str, label: &str, body: Value) -> Result<Value, SearchError> {
        let url = self.endpoint(path)?;
        with_backoff(self.retry, label, || {
            let request = self.authorize(self.client.post(url.clone())).json(&body);
            async move { read_json(request.send().await.map_err(unavailable)?).await }
        })
        .await
    }

    async fn get_json(&self, url: Url, label: &str) -> Result<Value, SearchError> {
        with_backoff(self.retry, label, || {
            let request = self.authorize(self.client.get(url.clone()));
            async move { read_json(request.send().await.map_err(unavailable)?).await }
        })
        .await
    }
}

/// A control-plane call (`api.pinecone.io`), retried like data-plane calls.
async fn control_json(
    client: &Client,
    settings: &StoreSettings,
    method: Method,
    url: &str,
    body: Option<&Value>,
    label: &str,
) -> Result<Value, SearchError> {
    with_backoff(settings.retry, label, || {
        let mut request = client
            .request(method.clone(), url)
            .header("Api-Key", &settings.api_key)
            .header("X-Pinecone-API-Version", &settings.api_version);
        if let Some(body) = body {
            request = request.json(body);
        }
        async move { read_json(request.send().await.map_err(unavailable)?).await }
    })
    .await
}

fn unavailable(error: reqwest::Error) -> SearchError {
    SearchError::StoreUnavailable {
        backend: BACKEND.to_string(),
        details: error.to_string(),
    }
}

async fn read_json(response: Response) -> Result<Value, SearchError> {
    let status = response.status();
    if status.is_success() {
        let body = response.text().await.map_err(unavailable)?;
        if body.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        return Ok(serde_json::from_str(&body)?);
    }

    let details = response.text().await.unwrap_or_default();
    Err(classify_status(status, details))
}

fn classify_status(status: StatusCode, details: String) -> SearchError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        SearchError::StoreUnavailable {
            backend: BACKEND.to_string(),
            details: format!("{status}: {details}"),
        }
    } else {
        SearchError::StoreRejected {
            backend: BACKEND.to_string(),
            status: status.as_u16(),
            details,
        }
    }
}

fn create_index_body(settings: &StoreSettings, dimension: usize) -> Value {
    json!({
        "name": settings.index_name,
        "dimension": dimension,
        "metric": "cosine",
        "spec": {
            "serverless": {
                "cloud": settings.cloud,
                "region": settings.region,
            }
        }
    })
}

fn index_is_ready(description: &Value) -> bool {
    description
        .pointer("/status/ready")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Groups serialized vectors into upsert requests within the count and body
/// size limits. A single oversized vector still goes out on its own.
fn upsert_requests(vectors: Vec<Value>, max_count: usize, max_bytes: usize) -> Result<Vec<Vec<Value>>, SearchError> {
    let mut requests = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0;

    for vector in vectors {
        let size = serde_json::to_vec(&vector)?.len() + 1;
        if !current.is_empty() && (current.len() >= max_count || current_bytes + size > max_bytes) {
            requests.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += size;
        current.push(vector);
    }
    if !current.is_empty() {
        requests.push(current);
    }

    Ok(requests)
}

fn parse_index_description(description: &Value) -> Result<(String, usize), SearchError> {
    let host = description
        .pointer("/host")
        .and_then(Value::as_str)
        .filter(|host| !host.is_empty())
        .ok_or_else(|| SearchError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "index description has no host".to_string(),
        })?;
    let dimension = description
        .pointer("/dimension")
        .and_then(Value::as_u64)
        .unwrap_or_default() as usize;

    Ok((host.to_string(), dimension))
}

fn parse_matches(response: &Value) -> Vec<CaseMatch> {
    response
        .pointer("/matches")
        .and_then(Value::as_array)
        .map(|matches| {
            matches
                .iter()
                .filter_map(|hit| {
                    let id = hit.pointer("/id").and_then(Value::as_str)?.to_string();
                    let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
                    let metadata = hit
                        .pointer("/metadata")
                        .cloned()
                        .and_then(|metadata| serde_json::from_value::<CaseMetadata>(metadata).ok())
                        .unwrap_or_default();
                    Some(CaseMatch { id, score, metadata })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_id_page(response: &Value) -> IdPage {
    let ids = response
        .pointer("/vectors")
        .and_then(Value::as_array)
        .map(|vectors| {
            vectors
                .iter()
                .filter_map(|vector| vector.pointer("/id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let next_token = response
        .pointer("/pagination/next")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string);

    IdPage { ids, next_token }
}

fn parse_stats(response: &Value) -> StoreStats {
    StoreStats {
        dimension: response
            .pointer("/dimension")
            .and_then(Value::as_u64)
            .unwrap_or_default() as usize,
        total_vector_count: response
            .pointer("/totalVectorCount")
            .and_then(Value::as_u64)
            .unwrap_or_default(),
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), SearchError> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            ensure_dimension(&record.values, self.dimension)?;
        }

        let vectors = records
            .iter()
            .map(|record| {
                Ok(json!({
                    "id": record.id,
                    "values": record.values,
                    "metadata": serde_json::to_value(&record.metadata)?,
                }))
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        for request in upsert_requests(vectors, MAX_UPSERT_BATCH, MAX_UPSERT_BYTES)? {
            let requested = request.len();
            let response = self
                .post_json("/vectors/upsert", "upsert", json!({ "vectors": request }))
                .await?;

            let upserted = response
                .pointer("/upsertedCount")
                .and_then(Value::as_u64)
                .unwrap_or(requested as u64);
            debug!(requested, upserted, "pinecone upsert");
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<CaseMatch>, SearchError> {
        ensure_dimension(vector, self.dimension)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .post_json(
                "/query",
                "query",
                json!({
                    "vector": vector,
                    "topK": top_k,
                    "includeMetadata": true,
                    "includeValues": false,
                }),
            )
            .await?;

        Ok(parse_matches(&response))
    }

    async fn delete(&self, ids: &[String]) -> Result<(), SearchError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.post_json("/vectors/delete", "delete", json!({ "ids": ids }))
            .await?;
        Ok(())
    }

    async fn list_ids_page(&self, token: Option<String>) -> Result<IdPage, SearchError> {
        let mut url = self.endpoint("/vectors/list")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &LIST_PAGE_LIMIT.to_string());
            if let Some(token) = token.as_deref() {
                query.append_pair("paginationToken", token);
            }
        }

        let response = self.get_json(url, "list").await?;
        Ok(parse_id_page(&response))
    }

    async fn stats(&self) -> Result<StoreStats, SearchError> {
        let response = self
            .post_json("/describe_index_stats", "describe_index_stats", json!({}))
            .await?;
        Ok(parse_stats(&response))
    }
}
