//! Document loading: fetch bytes from a URL or path and split them into pages.

pub mod chunking;
pub mod pdf;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ExtractionError;

pub use chunking::{Chunk, plan_chunks};

/// Form feed separates pages in plain-text documents.
const PAGE_BREAK: char = '\u{000C}';

/// Source text of a document, one entry per page. Immutable for the length of a run.
#[derive(Debug, Clone)]
pub struct Document {
    pub reference: String,
    pub pages: Vec<String>,
    pub content_hash: String,
}

impl Document {
    pub fn from_pages(reference: impl Into<String>, pages: Vec<String>) -> Self {
        let mut hasher = Sha256::new();
        for page in &pages {
            hasher.update(page.as_bytes());
            hasher.update([PAGE_BREAK as u8]);
        }
        Self {
            reference: reference.into(),
            pages,
            content_hash: format!("{:x}", hasher.finalize()),
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Text of a chunk with page markers, cut to at most `max_chars` characters.
    pub fn chunk_text(&self, chunk: &Chunk, max_chars: usize) -> String {
        let mut text = String::new();
        for page in chunk.pages() {
            if let Some(content) = self.pages.get(page - 1) {
                text.push_str(&format!("--- Page {} ---\n{}\n\n", page, content));
            }
        }
        truncate_chars(&text, max_chars)
    }
}

/// Downloaded or read source bytes.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

impl Fetched {
    pub fn is_pdf(&self) -> bool {
        let declared = self
            .content_type
            .as_deref()
            .and_then(|ct| ct.parse::<mime::Mime>().ok())
            .is_some_and(|m| m.essence_str() == mime::APPLICATION_PDF.essence_str());
        declared || self.bytes.starts_with(b"%PDF")
    }
}

/// Compute SHA-256 hash of a byte slice, returning a hex string.
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Fetch a source by URL (`http`/`https`) or local path.
///
/// 4xx responses are permanent failures; transport errors and 5xx responses can be retried.
pub async fn fetch_source(
    client: &reqwest::Client,
    reference: &str,
    timeout: Duration,
) -> Result<Fetched, ExtractionError> {
    if !(reference.starts_with("http://") || reference.starts_with("https://")) {
        let bytes = tokio::fs::read(reference)
            .await
            .map_err(|e| ExtractionError::Pdf {
                message: format!("Failed to read {}: {}", reference, e),
            })?;
        return Ok(Fetched {
            bytes: Bytes::from(bytes),
            content_type: None,
        });
    }

    let response = client
        .get(reference)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| classify_transport_error(reference, timeout, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ExtractionError::Network {
            message: format!("Download of {} failed with status {}", reference, status),
            recoverable: status.is_server_error() || status.as_u16() == 429,
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response
        .bytes()
        .await
        .map_err(|e| classify_transport_error(reference, timeout, e))?;

    debug!(reference, size = bytes.len(), "Source downloaded");
    Ok(Fetched {
        bytes,
        content_type,
    })
}

fn classify_transport_error(reference: &str, timeout: Duration, e: reqwest::Error) -> ExtractionError {
    if e.is_timeout() {
        ExtractionError::timeout(timeout)
    } else {
        ExtractionError::Network {
            message: format!("Failed to download {}: {}", reference, e),
            recoverable: true,
        }
    }
}

/// Split fetched bytes into page texts.
pub async fn split_pages(fetched: &Fetched) -> Result<Vec<String>, ExtractionError> {
    if fetched.is_pdf() {
        let bytes = fetched.bytes.clone();
        return tokio::task::spawn_blocking(move || pdf::extract_page_texts(&bytes))
            .await
            .map_err(|e| ExtractionError::Pdf {
                message: format!("PDF extraction task failed: {}", e),
            })?;
    }

    let text = std::str::from_utf8(&fetched.bytes).map_err(|e| ExtractionError::Pdf {
        message: format!("Document is neither PDF nor UTF-8 text: {}", e),
    })?;
    Ok(split_text_pages(text))
}

fn split_text_pages(text: &str) -> Vec<String> {
    let pages: Vec<String> = text
        .split(PAGE_BREAK)
        .map(|p| p.trim().to_string())
        .collect();
    // A trailing form feed does not start a new page
    match pages.split_last() {
        Some((last, rest)) if last.is_empty() && !rest.is_empty() => rest.to_vec(),
        _ => pages,
    }
}

/// Fetch a document and split it into pages.
pub async fn load_document(
    client: &reqwest::Client,
    reference: &str,
    timeout: Duration,
) -> Result<Document, ExtractionError> {
    let fetched = fetch_source(client, reference, timeout).await?;
    let pages = split_pages(&fetched).await?;

    if pages.iter().all(|p| p.trim().is_empty()) {
        return Err(ExtractionError::Pdf {
            message: format!("No text could be extracted from {}", reference),
        });
    }

    info!(reference, pages = pages.len(), "Document loaded");
    Ok(Document::from_pages(reference, pages))
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}
