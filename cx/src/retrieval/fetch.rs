//! Document fetching
//!
//! Fetches candidate URLs into [`Document`]s: HTML is converted to
//! markdown-ish text and re-chunked through the text splitter, PDFs go to
//! the CPU-pool parse service. Fetches are bounded by a shared semaphore
//! (the browser bound), raw bytes are cached through the temp-file cache
//! service, and the SHA-256 checksum is stamped onto the document.

use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use docstore::{Document, attrs};

use crate::config::SearchConfig;
use crate::services::base::{ServiceError, call};
use crate::services::cpu::PdfLoader;
use crate::services::threaded::{CacheRequest, TempFileCache};
use crate::text::TextSplitter;

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_BODY_BYTES: usize = 20_000_000;

/// Bounded fetcher turning URLs into documents.
pub struct DocumentLoader {
    http: reqwest::Client,
    splitter: TextSplitter,
    semaphore: Arc<Semaphore>,
    url_ignore_substrings: Vec<String>,
}

impl DocumentLoader {
    pub fn new(config: &SearchConfig, splitter: TextSplitter) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .user_agent("Mozilla/5.0 (compatible; ordinance-retrieval)")
                .build()
                .unwrap_or_default(),
            splitter,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_browsers.max(1))),
            url_ignore_substrings: config.url_ignore_substrings.clone(),
        }
    }

    /// Fetch one URL into a document. Returns `None` for ignored URLs,
    /// fetch failures, and empty documents.
    pub async fn fetch(&self, url: &str) -> Result<Option<Document>, ServiceError> {
        let Some((bytes, content_type, last_modified)) = self.fetch_raw(url).await? else {
            return Ok(None);
        };
        self.document_from_bytes(url, bytes, &content_type, last_modified)
            .await
    }

    /// Fetch every URL concurrently (bounded by the browser semaphore),
    /// keeping non-empty documents in input order.
    pub async fn fetch_all(&self, urls: &[String]) -> Result<Vec<Document>, ServiceError> {
        let fetches = urls.iter().map(|url| self.fetch(url));
        let outcomes = futures::future::join_all(fetches).await;
        let mut docs = Vec::new();
        for outcome in outcomes {
            if let Some(doc) = outcome? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    /// Raw fetch: `(bytes, content type, last-modified header)`, or
    /// `None` when the URL is ignored or the fetch failed.
    pub async fn fetch_raw(
        &self,
        url: &str,
    ) -> Result<Option<(Vec<u8>, String, Option<String>)>, ServiceError> {
        if self
            .url_ignore_substrings
            .iter()
            .any(|substr| url.contains(substr))
        {
            debug!(%url, "url matches ignore list");
            return Ok(None);
        }
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ServiceError::Cancelled)?;

        let response = match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(%url, status = %response.status(), "fetch rejected");
                return Ok(None);
            }
            Err(err) => {
                debug!(%url, %err, "fetch failed");
                return Ok(None);
            }
        };

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let last_modified = response
            .headers()
            .get("last-modified")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(err) => {
                debug!(%url, %err, "body read failed");
                return Ok(None);
            }
        };
        if bytes.len() > MAX_BODY_BYTES {
            warn!(%url, len = bytes.len(), "response too large, skipping");
            return Ok(None);
        }
        Ok(Some((bytes, content_type, last_modified)))
    }

    /// Build a document from fetched bytes, caching the raw content and
    /// stamping source, checksum, and date attributes.
    pub async fn document_from_bytes(
        &self,
        url: &str,
        bytes: Vec<u8>,
        content_type: &str,
        last_modified: Option<String>,
    ) -> Result<Option<Document>, ServiceError> {
        let is_pdf = content_type.contains("application/pdf")
            || url.to_lowercase().ends_with(".pdf")
            || bytes.starts_with(b"%PDF");

        let mut doc = if is_pdf {
            let pages = call::<PdfLoader>(bytes.clone()).await?;
            let mut doc = Document::new(pages);
            doc.set_attr(attrs::IS_PDF, true);
            doc
        } else {
            let text = String::from_utf8_lossy(&bytes);
            let markdown = html2md::rewrite_html(&text, false);
            let mut doc = Document::new(self.splitter.split(&markdown));
            doc.set_attr(attrs::IS_PDF, false);
            doc
        };

        if doc.is_empty() {
            debug!(%url, "document is empty after parsing");
            return Ok(None);
        }

        doc.set_attr(attrs::SOURCE, url);
        doc.set_attr(attrs::FROM_OCR, false);
        if let Some(date) = last_modified.as_deref().and_then(parse_http_date) {
            doc.set_date(Some(date.0), Some(date.1), Some(date.2));
        }

        let cached = call::<TempFileCache>(CacheRequest {
            file_stem: file_stem_for_url(url),
            extension: if is_pdf { "pdf".to_string() } else { "txt".to_string() },
            bytes,
        })
        .await?;
        doc.set_attr(attrs::CHECKSUM, cached.checksum);
        doc.set_attr(attrs::CACHE_PATH, cached.path.display().to_string());
        Ok(Some(doc))
    }
}

fn parse_http_date(value: &str) -> Option<(i64, i64, i64)> {
    chrono::DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| (dt.year() as i64, dt.month() as i64, dt.day() as i64))
}

fn file_stem_for_url(url: &str) -> String {
    let trimmed = url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let stem: String = trimmed
        .chars()
        .take(80)
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    if stem.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_date() {
        let parsed = parse_http_date("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parsed, Some((2015, 10, 21)));
        assert_eq!(parse_http_date("not a date"), None);
    }

    #[test]
    fn test_file_stem_for_url() {
        let stem = file_stem_for_url("https://example.com/docs/ord.pdf");
        assert_eq!(stem, "example_com_docs_ord_pdf");
        // empty URLs still produce a usable stem
        assert!(!file_stem_for_url("").is_empty());
    }

    #[tokio::test]
    async fn test_ignored_urls_are_skipped() {
        let config = SearchConfig {
            url_ignore_substrings: vec!["wikipedia".to_string()],
            ..SearchConfig::default()
        };
        let loader = DocumentLoader::new(&config, TextSplitter::new(1000, 100));
        let out = loader
            .fetch_raw("https://en.wikipedia.org/wiki/Wind_power")
            .await
            .expect("fetch");
        assert!(out.is_none());
    }
}
