use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use futures::future::join_all;
use reqwest::{Client, Url, header::CONTENT_TYPE};
use tokio::{sync::Semaphore, task};
use tracing::{debug, warn};

use super::{
    extract::{self, ExtractError, normalize_extension},
    types::{ExtractedDocument, FileReference},
};

/// Resolves file references to text. Never fails: transport and decoding
/// problems come back as degraded [`ExtractedDocument`]s.
#[derive(Clone)]
pub struct ContentFetcher {
    http: Client,
    permits: Arc<Semaphore>,
}

impl ContentFetcher {
    pub fn new(timeout: Duration, max_concurrent: usize) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for file fetching")?;

        Ok(Self {
            http,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        })
    }

    pub async fn fetch(&self, reference: &FileReference) -> ExtractedDocument {
        let locator = reference.locator.as_str();

        let (bytes, content_type) = match self.download(locator).await {
            Ok(downloaded) => downloaded,
            Err(err) => {
                warn!(%locator, error = %format!("{err:#}"), "file fetch failed");
                return ExtractedDocument::failed(locator, format!("{err:#}"));
            }
        };

        let extension = resolve_extension(reference, content_type.as_deref());
        let task_extension = extension.clone();
        let extracted = task::spawn_blocking(move || extract::extract(&bytes, &task_extension))
            .await
            .unwrap_or_else(|err| {
                Err(ExtractError::Failed(format!("extraction task failed: {err}")))
            });

        match extracted {
            Ok(text) => {
                debug!(%locator, %extension, chars = text.len(), "extracted file text");
                ExtractedDocument::ok(locator, text)
            }
            Err(ExtractError::Unsupported(extension)) => {
                debug!(%locator, %extension, "unsupported file type");
                ExtractedDocument::unsupported(locator, &extension)
            }
            Err(ExtractError::Failed(reason)) => {
                warn!(%locator, %extension, %reason, "file extraction failed");
                ExtractedDocument::failed(locator, reason)
            }
        }
    }

    /// Fetches concurrently; the output order always matches `references`.
    pub async fn fetch_all(&self, references: &[FileReference]) -> Vec<ExtractedDocument> {
        join_all(references.iter().map(|reference| self.fetch(reference))).await
    }

    async fn download(&self, locator: &str) -> Result<(Vec<u8>, Option<String>)> {
        let _permit = self
            .permits
            .acquire()
            .await
            .context("fetch limiter closed")?;

        let response = self
            .http
            .get(locator)
            .send()
            .await
            .with_context(|| format!("request to {locator} failed"))?
            .error_for_status()?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body from {locator}"))?;

        Ok((bytes.to_vec(), content_type))
    }
}

/// Declared type wins, then the locator's path suffix, then the response content type.
fn resolve_extension(reference: &FileReference, content_type: Option<&str>) -> String {
    reference
        .declared_type
        .as_deref()
        .and_then(extension_from_declared)
        .or_else(|| extension_from_locator(&reference.locator))
        .or_else(|| content_type.and_then(extension_from_mime).map(str::to_string))
        .unwrap_or_default()
}

fn extension_from_declared(declared: &str) -> Option<String> {
    let declared = declared.trim();
    if declared.contains('/') {
        return extension_from_mime(declared).map(str::to_string);
    }
    let extension = normalize_extension(declared);
    (!extension.is_empty()).then_some(extension)
}

/// Case-insensitive suffix of the last path segment; query and fragment are ignored.
fn extension_from_locator(locator: &str) -> Option<String> {
    let path = match Url::parse(locator) {
        Ok(url) => url.path().to_string(),
        Err(_) => locator
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let file_name = path.rsplit('/').next()?;
    let (stem, extension) = file_name.rsplit_once('.')?;
    if stem.is_empty() || extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

fn extension_from_mime(raw: &str) -> Option<&'static str> {
    let parsed: mime::Mime = raw.parse().ok()?;

    match (parsed.type_().as_str(), parsed.subtype().as_str()) {
        ("application", "pdf") => Some("pdf"),
        ("application", "vnd.openxmlformats-officedocument.wordprocessingml.document") => {
            Some("docx")
        }
        ("application", "zip" | "x-zip-compressed") => Some("zip"),
        ("application", "json") => Some("json"),
        ("application" | "text", "javascript") => Some("js"),
        ("text", "plain") => Some("txt"),
        ("text", "markdown") => Some("md"),
        ("text", "html") => Some("html"),
        ("text", "css") => Some("css"),
        ("text", "csv") => Some("csv"),
        ("text", "x-python") => Some("py"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::evaluator::types::ExtractionStatus;
    use axum::{
        Router,
        extract::Path as AxumPath,
        http::{StatusCode, header},
        response::IntoResponse,
        routing::get,
    };
    use tokio::{net::TcpListener, time::sleep};

    async fn spawn_file_server() -> String {
        let app = Router::new()
            .route(
                "/files/:name",
                get(|AxumPath(name): AxumPath<String>| async move {
                    let delay = match name.as_str() {
                        "a.txt" => 150,
                        "b.txt" => 300,
                        _ => 0,
                    };
                    sleep(Duration::from_millis(delay)).await;
                    format!("contents of {name}")
                }),
            )
            .route(
                "/blob",
                get(|| async { ([(header::CONTENT_TYPE, "text/markdown")], "# from blob") }),
            )
            .route("/missing.py", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/broken.pdf",
                get(|| async { b"%PDF-1.7\n1 0 obj << /Type /Catalog >>\ntrailer".to_vec() }),
            )
            .route(
                "/slow.md",
                get(|| async {
                    sleep(Duration::from_secs(5)).await;
                    "too late".into_response()
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[test]
    fn locator_suffix_ignores_query_and_case() {
        assert_eq!(
            extension_from_locator("https://cdn.example.com/u/Report.PDF?token=abc#page=2"),
            Some("pdf".to_string())
        );
        assert_eq!(extension_from_locator("https://example.com/download"), None);
        assert_eq!(extension_from_locator("https://example.com/.env"), None);
        assert_eq!(extension_from_locator("uploads/main.rs"), Some("rs".to_string()));
    }

    #[test]
    fn declared_type_overrides_locator() {
        let reference = FileReference::new("https://x/blob.bin").with_declared_type("application/pdf");
        assert_eq!(resolve_extension(&reference, None), "pdf");

        let reference = FileReference::new("https://x/blob.bin").with_declared_type(".DOCX");
        assert_eq!(resolve_extension(&reference, None), "docx");

        let reference = FileReference::new("https://x/blob");
        assert_eq!(
            resolve_extension(&reference, Some("text/plain; charset=utf-8")),
            "txt"
        );
        assert_eq!(resolve_extension(&reference, Some("application/octet-stream")), "");
    }

    #[tokio::test]
    async fn batch_preserves_order_when_completion_order_differs() {
        let base = spawn_file_server().await;
        let fetcher = ContentFetcher::new(Duration::from_secs(5), 5).unwrap();

        // c completes first, then a, then b.
        let references: Vec<_> = ["a.txt", "b.txt", "c.txt"]
            .iter()
            .map(|name| FileReference::new(format!("{base}/files/{name}")))
            .collect();

        let documents = fetcher.fetch_all(&references).await;
        let texts: Vec<_> = documents.iter().map(|doc| doc.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["contents of a.txt", "contents of b.txt", "contents of c.txt"]
        );
        assert!(documents.iter().all(|doc| doc.status == ExtractionStatus::Ok));
    }

    #[tokio::test]
    async fn failures_are_isolated_per_reference() {
        let base = spawn_file_server().await;
        let fetcher = ContentFetcher::new(Duration::from_millis(500), 2).unwrap();

        let references = vec![
            FileReference::new(format!("{base}/missing.py")),
            FileReference::new(format!("{base}/files/tool.exe")),
            FileReference::new(format!("{base}/slow.md")),
            FileReference::new(format!("{base}/blob")),
            FileReference::new("http://127.0.0.1:1/unreachable.txt"),
        ];

        let documents = fetcher.fetch_all(&references).await;
        assert_eq!(documents.len(), 5);

        assert!(matches!(documents[0].status, ExtractionStatus::Failed(ref reason) if reason.contains("404")));
        assert_eq!(documents[1].status, ExtractionStatus::Unsupported);
        assert!(documents[1].text.contains(".exe"));
        assert!(matches!(documents[2].status, ExtractionStatus::Failed(_)));
        assert_eq!(documents[3].text, "# from blob");
        assert!(matches!(documents[4].status, ExtractionStatus::Failed(_)));
        assert!(documents.iter().all(|doc| !doc.text.trim().is_empty()));
    }

    #[tokio::test]
    async fn corrupt_pdf_in_batch_degrades_alone() {
        let base = spawn_file_server().await;
        let fetcher = ContentFetcher::new(Duration::from_secs(5), 5).unwrap();

        let references = vec![
            FileReference::new(format!("{base}/broken.pdf")),
            FileReference::new(format!("{base}/files/c.txt")),
        ];

        let documents = fetcher.fetch_all(&references).await;
        assert!(matches!(documents[0].status, ExtractionStatus::Failed(_)));
        assert!(documents[0].text.starts_with("(Failed to extract file content:"));
        assert_eq!(documents[1].text, "contents of c.txt");
        assert_eq!(documents[1].status, ExtractionStatus::Ok);
    }
}
