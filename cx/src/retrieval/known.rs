//! Known-document loading
//!
//! The known-docs manifest is a JSON object mapping jurisdiction full
//! names to lists of local file paths. It is the last-resort retrieval
//! strategy and the entry point for re-parsing previously downloaded
//! ordinances.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use docstore::{Document, attrs};

use crate::services::base::{ServiceError, call};
use crate::services::cpu::PdfLoader;
use crate::text::TextSplitter;

/// Paths registered for a jurisdiction in the manifest, if any
pub fn known_paths_for(manifest_path: &Path, full_name: &str) -> Vec<PathBuf> {
    let manifest: Value = match std::fs::read_to_string(manifest_path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
    {
        Some(value) => value,
        None => {
            warn!(path = %manifest_path.display(), "could not read known-docs manifest");
            return Vec::new();
        }
    };
    manifest
        .get(full_name)
        .and_then(Value::as_array)
        .map(|paths| {
            paths
                .iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

/// Load each path into a document; unreadable or empty files are skipped.
pub async fn load_known_docs(
    paths: &[PathBuf],
    splitter: &TextSplitter,
) -> Result<Vec<Document>, ServiceError> {
    let mut docs = Vec::new();
    for path in paths {
        let Ok(bytes) = std::fs::read(path) else {
            warn!(path = %path.display(), "could not read known document");
            continue;
        };
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
            || bytes.starts_with(b"%PDF");

        let mut doc = if is_pdf {
            let pages = call::<PdfLoader>(bytes).await?;
            let mut doc = Document::new(pages);
            doc.set_attr(attrs::IS_PDF, true);
            doc
        } else {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            let mut doc = Document::new(splitter.split(&text));
            doc.set_attr(attrs::IS_PDF, false);
            doc
        };
        if doc.is_empty() {
            debug!(path = %path.display(), "known document is empty");
            continue;
        }
        doc.set_attr(attrs::SOURCE, path.display().to_string());
        doc.set_attr(attrs::FROM_OCR, false);
        docs.push(doc);
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_paths_for() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = dir.path().join("known.json");
        std::fs::write(
            &manifest,
            r#"{"Decatur County, Indiana": ["/data/decatur.pdf", "/data/decatur.txt"]}"#,
        )
        .expect("write");

        let paths = known_paths_for(&manifest, "Decatur County, Indiana");
        assert_eq!(paths.len(), 2);
        assert!(known_paths_for(&manifest, "Madison County, Indiana").is_empty());
    }

    #[test]
    fn test_missing_manifest_yields_nothing() {
        assert!(known_paths_for(Path::new("/nonexistent.json"), "x").is_empty());
    }

    #[tokio::test]
    async fn test_load_known_text_docs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ord.txt");
        std::fs::write(&path, "Wind setback of 1,000 feet from property lines.").expect("write");

        let splitter = TextSplitter::new(1000, 100);
        let docs = load_known_docs(&[path.clone(), dir.path().join("missing.txt")], &splitter)
            .await
            .expect("load");
        assert_eq!(docs.len(), 1);
        assert_eq!(
            docs[0].attr_str(attrs::SOURCE),
            Some(path.display().to_string().as_str())
        );
        assert!(docs[0].text().contains("1,000 feet"));
    }
}
