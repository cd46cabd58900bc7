//! CPU-pool service for document parsing
//!
//! PDF text extraction is CPU-bound, so it runs on a dedicated rayon pool
//! instead of the async runtime. A panicking parse is caught and surfaced
//! as [`ServiceError::WorkerCrashed`] without taking the pool down; pool
//! teardown aborts pending submissions via the normal scope cancellation.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use async_trait::async_trait;
use rayon::ThreadPool;
use tokio::sync::oneshot;
use tracing::warn;

use super::base::{Service, ServiceError};

/// Parser interface for PDF bytes. The concrete implementation (and any
/// OCR behavior) is an external collaborator.
pub trait PdfParser: Send + Sync + 'static {
    /// Extract ordered text pages from raw PDF bytes.
    fn parse(&self, bytes: &[u8]) -> Result<Vec<String>, String>;

    /// Whether this parser used OCR to extract the text
    fn uses_ocr(&self) -> bool {
        false
    }
}

/// Parser used when no PDF backend is configured; yields no pages so PDF
/// documents come back empty and are dropped by retrieval.
pub struct NoopPdfParser;

impl PdfParser for NoopPdfParser {
    fn parse(&self, _bytes: &[u8]) -> Result<Vec<String>, String> {
        warn!("no PDF parser configured; dropping PDF content");
        Ok(Vec::new())
    }
}

/// Service that runs PDF parsing on a fixed-size rayon pool.
pub struct PdfLoader {
    pool: ThreadPool,
    parser: Arc<dyn PdfParser>,
}

impl PdfLoader {
    pub fn new(workers: usize, parser: Arc<dyn PdfParser>) -> Result<Self, ServiceError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .map_err(|err| ServiceError::Other(err.to_string()))?;
        Ok(Self { pool, parser })
    }

    /// Whether the configured parser extracts text via OCR
    pub fn uses_ocr(&self) -> bool {
        self.parser.uses_ocr()
    }
}

#[async_trait]
impl Service for PdfLoader {
    const NAME: &'static str = "PdfLoader";
    type Request = Vec<u8>;
    type Response = Vec<String>;

    async fn process(&self, bytes: Vec<u8>) -> Result<Vec<String>, ServiceError> {
        let parser = Arc::clone(&self.parser);
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| parser.parse(&bytes)));
            let _ = tx.send(outcome);
        });
        match rx.await {
            Ok(Ok(Ok(pages))) => Ok(pages),
            Ok(Ok(Err(err))) => Err(ServiceError::Other(err)),
            Ok(Err(panic)) => Err(ServiceError::WorkerCrashed(panic_message(&panic))),
            Err(_) => Err(ServiceError::Cancelled),
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedParser;

    impl PdfParser for FixedParser {
        fn parse(&self, bytes: &[u8]) -> Result<Vec<String>, String> {
            Ok(vec![String::from_utf8_lossy(bytes).to_string()])
        }
    }

    struct PanickingParser;

    impl PdfParser for PanickingParser {
        fn parse(&self, _bytes: &[u8]) -> Result<Vec<String>, String> {
            panic!("corrupt xref table");
        }
    }

    #[tokio::test]
    async fn test_pdf_loader_parses_on_pool() {
        let loader = PdfLoader::new(2, Arc::new(FixedParser)).expect("pool");
        let pages = loader.process(b"page text".to_vec()).await.expect("parse");
        assert_eq!(pages, vec!["page text".to_string()]);
    }

    #[tokio::test]
    async fn test_worker_crash_is_surfaced_and_pool_survives() {
        let loader = PdfLoader::new(1, Arc::new(PanickingParser)).expect("pool");
        let err = loader.process(b"bad".to_vec()).await.unwrap_err();
        assert!(matches!(err, ServiceError::WorkerCrashed(msg) if msg.contains("xref")));

        // the pool must still accept work after a crash
        let err = loader.process(b"bad again".to_vec()).await.unwrap_err();
        assert!(matches!(err, ServiceError::WorkerCrashed(_)));
    }

    #[tokio::test]
    async fn test_noop_parser_yields_no_pages() {
        let loader = PdfLoader::new(1, Arc::new(NoopPdfParser)).expect("pool");
        let pages = loader.process(b"%PDF-1.4".to_vec()).await.expect("parse");
        assert!(pages.is_empty());
    }
}
