//! HTTP surface over [`CaseFinder`].
//!
//! - POST /upload_and_match - multipart `file`, returns the nearest cases
//! - GET /download/{filename} - a previously uploaded file
//! - GET /list - uploaded file names

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use case_search_core::{CaseFinder, SearchError};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    finder: CaseFinder,
    upload_dir: PathBuf,
    top_k: usize,
}

impl AppState {
    pub fn new(finder: CaseFinder, upload_dir: PathBuf, top_k: usize) -> Self {
        Self {
            finder,
            upload_dir,
            top_k,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MatchResult {
    pub file: String,
    pub score: f32,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    pub message: String,
    pub results: Vec<MatchResult>,
}

#[derive(Debug, Serialize)]
pub struct FileList {
    pub files: Vec<String>,
}

#[derive(Debug)]
pub enum ApiError {
    NoFile,
    UnreadablePdf,
    Backend(String),
    NotFound,
    Internal(String),
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NoFile => (StatusCode::BAD_REQUEST, "no file provided"),
            Self::UnreadablePdf => (StatusCode::BAD_REQUEST, "unreadable PDF"),
            Self::Backend(_) => (StatusCode::BAD_GATEWAY, "search backend failure"),
            Self::NotFound => (StatusCode::NOT_FOUND, "file not found"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::EmptyDocument(_) => Self::UnreadablePdf,
            other => Self::Backend(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        match &self {
            Self::Backend(details) | Self::Internal(details) => {
                error!(%status, details = %details, "request failed")
            }
            _ => warn!(%status, message, "request rejected"),
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/upload_and_match", post(upload_and_match))
        .route("/download/{filename}", get(download))
        .route("/list", get(list_files))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, bind: SocketAddr) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&state.upload_dir).await?;
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, upload_dir = %state.upload_dir.display(), "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    info!("server stopped");
    Ok(())
}

/// Bare file name of an upload, or `None` for anything that would escape
/// the upload directory.
fn safe_file_name(raw: &str) -> Option<String> {
    let name = Path::new(raw).file_name()?.to_str()?.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return None;
    }
    Some(name.to_string())
}

async fn upload_and_match(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<MatchResponse>, ApiError> {
    let mut saved = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, "malformed multipart body");
        ApiError::NoFile
    })? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .and_then(safe_file_name)
            .ok_or(ApiError::NoFile)?;
        let bytes = field.bytes().await.map_err(|err| {
            warn!(error = %err, "upload interrupted");
            ApiError::NoFile
        })?;

        tokio::fs::create_dir_all(&state.upload_dir)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        let path = state.upload_dir.join(&file_name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        info!(file = %file_name, bytes = bytes.len(), "stored upload");
        saved = Some(path);
        break;
    }

    let path = saved.ok_or(ApiError::NoFile)?;
    let matches = state.finder.find_similar_file(&path, state.top_k).await?;

    Ok(Json(MatchResponse {
        message: "Matches retrieved successfully!".to_string(),
        results: matches
            .into_iter()
            .map(|hit| MatchResult {
                file: hit.id,
                score: hit.score,
            })
            .collect(),
    }))
}

async fn download(
    State(state): State<AppState>,
    UrlPath(filename): UrlPath<String>,
) -> Result<Response, ApiError> {
    let name = safe_file_name(&filename)
        .filter(|name| *name == filename)
        .ok_or(ApiError::NotFound)?;
    let bytes = tokio::fs::read(state.upload_dir.join(&name))
        .await
        .map_err(|_| ApiError::NotFound)?;

    let content_type = if name.to_ascii_lowercase().ends_with(".pdf") {
        "application/pdf"
    } else {
        "application/octet-stream"
    };
    let headers = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{name}\""),
        ),
    ];
    Ok((headers, bytes).into_response())
}

async fn list_files(State(state): State<AppState>) -> Result<Json<FileList>, ApiError> {
    let mut files = Vec::new();
    let mut entries = match tokio::fs::read_dir(&state.upload_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Json(FileList { files }))
        }
        Err(err) => return Err(ApiError::Internal(err.to_string())),
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
    {
        let is_file = entry
            .file_type()
            .await
            .map(|kind| kind.is_file())
            .unwrap_or(false);
        if is_file {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(Json(FileList { files }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use case_search_core::{
        CaseMetadata, DocumentReader, Embedder, HashingEmbedder, MemoryStore, VectorRecord,
        VectorStore,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const DIM: usize = 64;
    const BOUNDARY: &str = "case-search-boundary";

    struct PlainTextReader;

    impl DocumentReader for PlainTextReader {
        fn read_text(&self, path: &Path) -> String {
            std::fs::read_to_string(path).unwrap_or_default()
        }
    }

    fn case_text(topic: &str) -> String {
        format!(
            "In the matter of {topic}. The petitioner sought relief before the court. \
             The bench ruled on {topic} after hearing both parties."
        )
    }

    async fn state_with_cases(topics: &[&str]) -> (AppState, TempDir) {
        let embedder = Arc::new(HashingEmbedder::new(DIM));
        let store = Arc::new(MemoryStore::new(DIM));
        let records = topics
            .iter()
            .map(|topic| VectorRecord {
                id: topic.replace(' ', "-"),
                values: embedder.embed(&case_text(topic)).unwrap(),
                metadata: CaseMetadata {
                    filename: format!("{}.pdf", topic.replace(' ', "-")),
                    ..CaseMetadata::default()
                },
            })
            .collect::<Vec<_>>();
        store.upsert(&records).await.unwrap();

        let finder = CaseFinder::new(Arc::new(PlainTextReader), embedder, store).unwrap();
        let dir = tempfile::tempdir().unwrap();
        (AppState::new(finder, dir.path().to_path_buf(), 5), dir)
    }

    fn multipart_request(field: &str, file_name: &str, content: &str) -> Request<Body> {
        let body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n\
             Content-Type: application/pdf\r\n\r\n\
             {content}\r\n\
             --{BOUNDARY}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri("/upload_and_match")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn upload_returns_ranked_matches() {
        let (state, dir) =
            state_with_cases(&["land acquisition", "anticipatory bail", "cheque dishonour"]).await;

        let response = router(state)
            .oneshot(multipart_request(
                "file",
                "query.pdf",
                &case_text("anticipatory bail"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["message"], "Matches retrieved successfully!");
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["file"], "anticipatory-bail");
        let scores = results
            .iter()
            .map(|hit| hit["score"].as_f64().unwrap())
            .collect::<Vec<_>>();
        assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
        assert!(dir.path().join("query.pdf").is_file());
    }

    #[tokio::test]
    async fn upload_without_file_field_is_bad_request() {
        let (state, _dir) = state_with_cases(&["land acquisition"]).await;

        let response = router(state)
            .oneshot(multipart_request("document", "query.pdf", "text"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "no file provided");
    }

    #[tokio::test]
    async fn upload_without_text_is_unreadable() {
        let (state, _dir) = state_with_cases(&["land acquisition"]).await;

        let response = router(state)
            .oneshot(multipart_request("file", "scan.pdf", "   "))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "unreadable PDF");
    }

    #[tokio::test]
    async fn list_and_download_uploaded_files() {
        let (state, dir) = state_with_cases(&["land acquisition"]).await;
        std::fs::write(dir.path().join("b.pdf"), "second").unwrap();
        std::fs::write(dir.path().join("a.pdf"), "first").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let app = router(state);

        let response = app.clone().oneshot(get("/list")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["files"], json!(["a.pdf", "b.pdf"]));

        let response = app.oneshot(get("/download/a.pdf")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/pdf"
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"first");
    }

    #[tokio::test]
    async fn missing_or_escaping_download_is_not_found() {
        let (state, dir) = state_with_cases(&["land acquisition"]).await;
        let app = router(state);

        let response = app.clone().oneshot(get("/download/nope.pdf")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "file not found");

        let outside = dir.path().parent().unwrap().join("secret.pdf");
        let escaped = format!("/download/..%2F{}", outside.file_name().unwrap().to_string_lossy());
        let response = app.oneshot(get(&escaped)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn file_names_are_reduced_to_their_last_component() {
        assert_eq!(safe_file_name("case.pdf").as_deref(), Some("case.pdf"));
        assert_eq!(safe_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(safe_file_name(".."), None);
        assert_eq!(safe_file_name(""), None);
    }

    #[test]
    fn search_errors_map_to_client_or_gateway_status() {
        let unreadable = ApiError::from(SearchError::EmptyDocument("x.pdf".into()));
        assert_eq!(unreadable.status_and_message().0, StatusCode::BAD_REQUEST);

        let backend = ApiError::from(SearchError::StoreUnavailable {
            backend: "pinecone".into(),
            details: "503".into(),
        });
        assert_eq!(backend.status_and_message().0, StatusCode::BAD_GATEWAY);
    }
}
