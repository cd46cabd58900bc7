//! Document type - an opaque text blob plus an additive attribute map
//!
//! A document is produced by retrieval (web search, crawl, or local load)
//! and then enriched in place by later pipeline stages. Attributes are
//! additive: stages stamp new keys onto the same document and never remove
//! keys written by earlier stages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known attribute keys stamped onto documents by the pipeline.
///
/// Retrieval writes `SOURCE`, `DATE`, `CHECKSUM`, `FROM_OCR` and
/// `CACHE_PATH`; validation writes the score keys; narrowing writes the
/// per-stage text keys.
pub mod attrs {
    /// URL or file path the document was loaded from
    pub const SOURCE: &str = "source";
    /// `(year, month, day)` triple, entries may be null
    pub const DATE: &str = "date";
    /// SHA-256 of the cached raw bytes
    pub const CHECKSUM: &str = "checksum";
    /// Whether OCR was used to extract the text
    pub const FROM_OCR: &str = "from_ocr";
    /// Path of the cached raw file awaiting move into the run directory
    pub const CACHE_PATH: &str = "cache_path";
    /// Full name of the jurisdiction this document was retrieved for
    pub const JURISDICTION_NAME: &str = "jurisdiction_name";
    /// Weighted-vote score from the jurisdiction validator
    pub const JURISDICTION_SCORE: &str = "jurisdiction_score";
    /// Weighted-vote score from the jurisdiction-name validator
    pub const NAME_SCORE: &str = "name_score";
    /// Combined ordinance text assembled from validated chunks
    pub const ORDINANCE_TEXT: &str = "ordinance_text";
    /// True once the content validator found ordinance info
    pub const CONTAINS_ORD_INFO: &str = "contains_ord_info";
    /// Narrowing stage output: text for any energy system
    pub const ENERGY_SYSTEMS_TEXT: &str = "energy_systems_text";
    /// Narrowing stage output: final cleaned ordinance text
    pub const CLEANED_ORDINANCE_TEXT: &str = "cleaned_ordinance_text";
    /// Sentence n-gram containment of the cleaned text in the original
    pub const NGRAM_SCORE: &str = "ngram_score";
    /// Path the cleaned text was written to
    pub const CLEANED_PATH: &str = "cleaned_path";
    /// Path the raw document was moved to
    pub const OUT_PATH: &str = "out_path";
    /// Path the structured values CSV was written to
    pub const VALUES_PATH: &str = "values_path";
    /// Whether the document is a PDF
    pub const IS_PDF: &str = "is_pdf";
}

/// An opaque blob of text plus an attribute mapping.
///
/// The text is stored as ordered pages (text chunks); `text()` joins them.
/// A document is owned by the jurisdiction task that created it until it is
/// persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pages: Vec<String>,
    /// Attribute mapping, enriched by successive pipeline stages
    pub attrs: Map<String, Value>,
}

impl Document {
    /// Create a document from ordered text pages
    pub fn new(pages: Vec<String>) -> Self {
        Self {
            pages,
            attrs: Map::new(),
        }
    }

    /// Create a document from a single blob of text
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new(vec![text.into()])
    }

    /// Ordered text pages
    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    /// Replace the page list (used when re-chunking HTML text)
    pub fn set_pages(&mut self, pages: Vec<String>) {
        self.pages = pages;
    }

    /// Full document text, pages joined by newlines
    pub fn text(&self) -> String {
        self.pages.join("\n")
    }

    /// Total text length across pages
    pub fn text_len(&self) -> usize {
        self.pages.iter().map(String::len).sum()
    }

    /// True when the document contains no non-whitespace text
    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.trim().is_empty())
    }

    /// Set an attribute, converting the value with `serde_json::json!`-style
    /// semantics
    pub fn set_attr(&mut self, key: &str, value: impl Into<Value>) {
        self.attrs.insert(key.to_string(), value.into());
    }

    /// Read a string attribute
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    /// Read a float attribute
    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attrs.get(key).and_then(Value::as_f64)
    }

    /// Read a boolean attribute
    pub fn attr_bool(&self, key: &str) -> Option<bool> {
        self.attrs.get(key).and_then(Value::as_bool)
    }

    /// Whether the source bytes were a PDF
    pub fn is_pdf(&self) -> bool {
        self.attr_bool(attrs::IS_PDF).unwrap_or(false)
    }

    /// Set the document date as a `(year, month, day)` triple
    pub fn set_date(&mut self, year: Option<i64>, month: Option<i64>, day: Option<i64>) {
        self.attrs.insert(
            attrs::DATE.to_string(),
            Value::Array(vec![
                year.map_or(Value::Null, Value::from),
                month.map_or(Value::Null, Value::from),
                day.map_or(Value::Null, Value::from),
            ]),
        );
    }

    /// `(year, month, day)` from the date attribute; missing entries are None
    pub fn date(&self) -> (Option<i64>, Option<i64>, Option<i64>) {
        let Some(Value::Array(parts)) = self.attrs.get(attrs::DATE) else {
            return (None, None, None);
        };
        let get = |i: usize| parts.get(i).and_then(Value::as_i64);
        (get(0), get(1), get(2))
    }

    /// Year the ordinance was enacted, if a positive year was recorded
    pub fn ord_year(&self) -> Option<i64> {
        self.date().0.filter(|y| *y > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_joins_pages() {
        let doc = Document::new(vec!["page one".to_string(), "page two".to_string()]);
        assert_eq!(doc.text(), "page one\npage two");
        assert_eq!(doc.text_len(), 16);
    }

    #[test]
    fn test_empty_document() {
        assert!(Document::new(vec![]).is_empty());
        assert!(Document::new(vec!["  \n".to_string()]).is_empty());
        assert!(!Document::from_text("text").is_empty());
    }

    #[test]
    fn test_attrs_are_additive() {
        let mut doc = Document::from_text("text");
        doc.set_attr(attrs::SOURCE, "http://example.com");
        doc.set_attr(attrs::CONTAINS_ORD_INFO, true);
        assert_eq!(doc.attr_str(attrs::SOURCE), Some("http://example.com"));
        assert_eq!(doc.attr_bool(attrs::CONTAINS_ORD_INFO), Some(true));
    }

    #[test]
    fn test_ord_year_requires_positive_year() {
        let mut doc = Document::from_text("text");
        assert_eq!(doc.ord_year(), None);

        doc.set_date(Some(2023), Some(5), Some(15));
        assert_eq!(doc.ord_year(), Some(2023));

        doc.set_date(Some(0), Some(5), Some(15));
        assert_eq!(doc.ord_year(), None);

        doc.set_date(Some(-1), None, None);
        assert_eq!(doc.ord_year(), None);

        doc.set_date(None, Some(5), Some(15));
        assert_eq!(doc.ord_year(), None);
    }

    #[test]
    fn test_date_round_trip() {
        let mut doc = Document::from_text("text");
        doc.set_date(Some(2020), None, Some(3));
        assert_eq!(doc.date(), (Some(2020), None, Some(3)));
    }
}
