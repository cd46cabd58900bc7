//! Ordinance extraction: chunk validation, text narrowing, and
//! structured per-feature parsing
//!
//! The entry points here compose the validator (C5), the narrowing
//! pipeline (C7), and the structured parser (C8) around a [`Document`].

pub mod features;
pub mod graphs;
pub mod narrow;
pub mod parse;
pub mod solar;
pub mod tech;
pub mod wind;

pub use narrow::OrdinanceTextExtractor;
pub use parse::{PermittedUseDistrictsParser, StructuredOrdinanceParser};
pub use tech::{NarrowingStage, TechProfile};

use tracing::info;

use docstore::{Document, attrs};

use crate::config::ExtractionConfig;
use crate::llm::client::CallKwargs;
use crate::llm::{LlmCaller, StructuredLlmCaller};
use crate::ordinances::OrdinanceRow;
use crate::services::base::ServiceError;
use crate::services::usage::SharedUsage;
use crate::text::TextSplitter;
use crate::validation::content::OrdinanceValidator;

/// Run the chunked content validator over a document and stamp whether
/// (and where) it contains ordinance info for the profile's technology.
pub async fn check_for_ordinance_info(
    doc: &mut Document,
    profile: &TechProfile,
    splitter: &TextSplitter,
    config: &ExtractionConfig,
    usage: Option<SharedUsage>,
    kwargs: CallKwargs,
) -> Result<bool, ServiceError> {
    if doc.attrs.contains_key(attrs::CONTAINS_ORD_INFO) {
        return Ok(doc.attr_bool(attrs::CONTAINS_ORD_INFO).unwrap_or(false));
    }

    let chunks = if doc.pages().len() > 1 {
        doc.pages().to_vec()
    } else {
        splitter.split(&doc.text())
    };

    let caller = StructuredLlmCaller::new(usage, kwargs);
    let mut validator = OrdinanceValidator::new(
        caller,
        chunks,
        config.num_to_recall,
        profile.heuristic,
        profile.validator_prompts.clone(),
    );
    let contains = validator.parse(config.min_chunks_to_process).await?;
    doc.set_attr(attrs::CONTAINS_ORD_INFO, contains);
    if contains {
        doc.set_attr(attrs::ORDINANCE_TEXT, validator.ordinance_text());
    }
    info!(contains, "ordinance info check complete");
    Ok(contains)
}

/// Run the narrowing stages over a validated document, stamping stage
/// outputs and the n-gram fidelity score.
pub async fn extract_ordinance_text(
    doc: &mut Document,
    profile: &TechProfile,
    splitter: &TextSplitter,
    config: &ExtractionConfig,
    usage: Option<SharedUsage>,
    kwargs: CallKwargs,
) -> Result<(), ServiceError> {
    let caller = LlmCaller::new(usage, kwargs);
    let extractor = OrdinanceTextExtractor::new(&caller, &profile.narrowing_stages);
    extractor.extract(doc, splitter, config.ngram_size).await
}

/// Run structured extraction on a document's cleaned ordinance text.
pub async fn extract_ordinance_values(
    doc: &Document,
    profile: &TechProfile,
    usage: Option<SharedUsage>,
    kwargs: CallKwargs,
) -> Result<Vec<OrdinanceRow>, ServiceError> {
    let Some(text) = doc.attr_str(attrs::CLEANED_ORDINANCE_TEXT) else {
        return Ok(Vec::new());
    };
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let parser = StructuredOrdinanceParser::new(profile, usage, kwargs);
    parser.parse(text).await
}
