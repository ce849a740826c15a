use crate::error::IngestError;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Text-layer extraction. An `Ok` with empty pages means the PDF loaded but
/// carries no text layer.
pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

/// Renders pages and recognizes their text.
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    fn ocr_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

/// Anything that turns a corpus file into plain text. Returns an empty string
/// when nothing readable could be produced.
pub trait DocumentReader: Send + Sync {
    fn read_text(&self, path: &Path) -> String;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document = Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            match document.extract_text(&[page_no]) {
                Ok(text) if !text.trim().is_empty() => pages.push(PageText {
                    number: page_no,
                    text,
                }),
                Ok(_) => {}
                Err(error) => {
                    debug!(path = %path.display(), page = page_no, %error, "page has no extractable text");
                }
            }
        }

        Ok(pages)
    }
}

/// `pdftoppm` + `tesseract`, one PNG per page.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub pdftoppm: PathBuf,
    pub tesseract: PathBuf,
    pub dpi: u32,
    pub language: String,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            pdftoppm: PathBuf::from("pdftoppm"),
            tesseract: PathBuf::from("tesseract"),
            dpi: 200,
            language: "eng".to_string(),
        }
    }
}

impl TesseractOcr {
    fn render_pages(&self, path: &Path, workdir: &Path) -> Result<Vec<(u32, PathBuf)>, IngestError> {
        let prefix = workdir.join("page");
        let output = Command::new(&self.pdftoppm)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg(path)
            .arg(&prefix)
            .output()
            .map_err(|error| {
                IngestError::OcrFailed(format!("cannot run {}: {error}", self.pdftoppm.display()))
            })?;

        if !output.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "{} exited with {}: {}",
                self.pdftoppm.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut images = std::fs::read_dir(workdir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter_map(|image| page_number_of(&image).map(|number| (number, image)))
            .collect::<Vec<_>>();
        images.sort_by_key(|(number, _)| *number);
        Ok(images)
    }

    fn recognize(&self, image: &Path) -> Result<String, IngestError> {
        let output = Command::new(&self.tesseract)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .map_err(|error| {
                IngestError::OcrFailed(format!("cannot run {}: {error}", self.tesseract.display()))
            })?;

        if !output.status.success() {
            return Err(IngestError::OcrFailed(format!(
                "{} exited with {} on {}",
                self.tesseract.display(),
                output.status,
                image.display()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn ocr_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let workdir = tempfile::tempdir()?;
        let images = self.render_pages(path, workdir.path())?;

        let mut pages = Vec::new();
        for (number, image) in images {
            let text = self.recognize(&image)?;
            if !text.trim().is_empty() {
                pages.push(PageText { number, text });
            }
        }
        Ok(pages)
    }
}

/// `page-7.png` / `page-007.png` -> 7.
fn page_number_of(image: &Path) -> Option<u32> {
    let is_png = image
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    if !is_png {
        return None;
    }

    image
        .file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.rsplit_once('-'))
        .and_then(|(_, number)| number.parse().ok())
}

#[derive(Debug, Clone, Serialize)]
struct OcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrResponse {
    pages: Option<Vec<OcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl OcrEndpointConfig {
    /// Reads `OCR_ENDPOINT` and the optional `OCR_API_KEY`.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("OCR_ENDPOINT").ok()?;
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = std::env::var("OCR_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|key| !key.is_empty());

        Some(Self { endpoint, api_key })
    }
}

/// Remote OCR service that accepts the whole PDF as base64.
///
/// Like the embedder, the blocking client is built lazily on the worker thread.
pub struct HttpOcr {
    config: OcrEndpointConfig,
    client: OnceLock<Client>,
}

impl HttpOcr {
    pub fn new(config: OcrEndpointConfig) -> Self {
        Self {
            config,
            client: OnceLock::new(),
        }
    }

    fn client(&self) -> Result<&Client, IngestError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder().build()?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl OcrEngine for HttpOcr {
    fn name(&self) -> &str {
        "http"
    }

    fn ocr_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let pdf = std::fs::read(path)?;
        let payload = OcrRequest {
            pdf_base64: STANDARD.encode(pdf),
            source_path: path.to_string_lossy().to_string(),
        };

        let mut request = self
            .client()?
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;

        if !response.status().is_success() {
            return Err(IngestError::OcrFailed(format!(
                "OCR request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: OcrResponse = response.json()?;
        payload_to_pages(&payload, path)
    }
}

fn payload_to_pages(payload: &OcrResponse, path: &Path) -> Result<Vec<PageText>, IngestError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_ref().map(|value| value.trim().to_string())?;
                if text.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: page.page.unwrap_or(1),
                        text,
                    })
                }
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let normalized = chunk.trim().to_string();
                if normalized.is_empty() {
                    None
                } else {
                    Some(PageText {
                        number: (index + 1) as u32,
                        text: normalized,
                    })
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(IngestError::OcrFailed(format!(
        "OCR response was empty for {}",
        path.display()
    )))
}

/// Text layer first, OCR when the text layer is blank.
pub struct TextExtractor {
    primary: Box<dyn PdfExtractor>,
    ocr: Option<Box<dyn OcrEngine>>,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new(Box::new(LopdfExtractor), Some(Box::new(TesseractOcr::default())))
    }
}

impl TextExtractor {
    pub fn new(primary: Box<dyn PdfExtractor>, ocr: Option<Box<dyn OcrEngine>>) -> Self {
        Self { primary, ocr }
    }

    pub fn without_ocr() -> Self {
        Self::new(Box::new(LopdfExtractor), None)
    }

    /// Never fails: unreadable files and OCR errors yield `""`.
    pub fn extract(&self, path: &Path) -> String {
        let pages = match self.primary.extract_pages(path) {
            Ok(pages) => pages,
            Err(error) => {
                warn!(path = %path.display(), %error, "pdf extraction failed");
                return String::new();
            }
        };

        let text = join_pages(&pages);
        if !text.trim().is_empty() {
            return text;
        }

        let Some(ocr) = &self.ocr else {
            debug!(path = %path.display(), "no text layer and OCR is disabled");
            return String::new();
        };

        debug!(path = %path.display(), engine = ocr.name(), "no text layer, using OCR");
        match ocr.ocr_pages(path) {
            Ok(pages) => join_pages(&pages),
            Err(error) => {
                warn!(path = %path.display(), engine = ocr.name(), %error, "OCR fallback failed");
                String::new()
            }
        }
    }
}

impl DocumentReader for TextExtractor {
    fn read_text(&self, path: &Path) -> String {
        self.extract(path)
    }
}

fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.text.trim())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Object, Stream};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct FakeOcr {
        text: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl OcrEngine for FakeOcr {
        fn name(&self) -> &str {
            "fake"
        }

        fn ocr_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                PageText {
                    number: 1,
                    text: self.text.to_string(),
                },
                PageText {
                    number: 2,
                    text: "second page".to_string(),
                },
            ])
        }
    }

    fn write_pdf(path: &Path, text: Option<&str>) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let operations = match text {
            Some(text) => vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
            None => Vec::new(),
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[test]
    fn text_layer_is_used_when_present() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("judgment.pdf");
        write_pdf(&path, Some("Judgment of the Supreme Court"));

        let calls = Arc::new(AtomicUsize::new(0));
        let extractor = TextExtractor::new(
            Box::new(LopdfExtractor),
            Some(Box::new(FakeOcr {
                text: "ocr text",
                calls: calls.clone(),
            })),
        );

        let text = extractor.extract(&path);
        assert!(text.contains("Judgment"), "unexpected text: {text:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn blank_text_layer_falls_back_to_ocr() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scanned.pdf");
        write_pdf(&path, None);

        let calls = Arc::new(AtomicUsize::new(0));
        let extractor = TextExtractor::new(
            Box::new(LopdfExtractor),
            Some(Box::new(FakeOcr {
                text: "scanned order of the tribunal",
                calls: calls.clone(),
            })),
        );

        let text = extractor.extract(&path);
        assert_eq!(text, "scanned order of the tribunal\nsecond page");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blank_text_layer_without_ocr_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scanned.pdf");
        write_pdf(&path, None);

        assert_eq!(TextExtractor::without_ocr().extract(&path), "");
    }

    #[test]
    fn garbage_file_yields_empty_string() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.pdf");
        std::fs::write(&path, b"this is not a pdf at all").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let extractor = TextExtractor::new(
            Box::new(LopdfExtractor),
            Some(Box::new(FakeOcr {
                text: "should not be used",
                calls: calls.clone(),
            })),
        );

        assert_eq!(extractor.extract(&path), "");
        assert_eq!(extractor.extract(&dir.path().join("missing.pdf")), "");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rendered_pages_sort_numerically() {
        assert_eq!(page_number_of(Path::new("/tmp/x/page-07.png")), Some(7));
        assert_eq!(page_number_of(Path::new("/tmp/x/page-12.png")), Some(12));
        assert_eq!(page_number_of(Path::new("/tmp/x/page-1.ppm")), None);
    }

    #[test]
    fn ocr_payload_with_pages_converts_only_nonempty_text() {
        let response = OcrResponse {
            pages: Some(vec![
                OcrPage {
                    page: Some(2),
                    text: Some("  ".to_string()),
                },
                OcrPage {
                    page: Some(3),
                    text: Some("Page 3".to_string()),
                },
            ]),
            text: None,
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf"))
            .expect("OCR response should be parsed");

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].number, 3);
        assert_eq!(pages[0].text, "Page 3");
    }

    #[test]
    fn ocr_payload_fallback_text_split_by_form_feed() {
        let response = OcrResponse {
            pages: None,
            text: Some("First\u{000C}Second\n".to_string()),
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf"))
            .expect("OCR response should be parsed");

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].text, "First");
        assert_eq!(pages[1].number, 2);
        assert_eq!(pages[1].text, "Second");
    }

    #[tokio::test]
    async fn http_ocr_is_built_on_the_runtime_and_fails_from_a_worker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%fake").unwrap();

        let ocr = Arc::new(HttpOcr::new(OcrEndpointConfig {
            endpoint: "http://127.0.0.1:9/ocr".to_string(),
            api_key: None,
        }));
        let worker = ocr.clone();
        let result = tokio::task::spawn_blocking(move || worker.ocr_pages(&path))
            .await
            .unwrap();

        assert!(result.is_err());
        drop(ocr);
    }
}
