//! Text narrowing pipeline
//!
//! Each stage fans one fixed extraction instruction out over the current
//! text's chunks, keeps the responses that pass the validity check, and
//! overlap-merges the survivors into the next stage's input. Stage
//! outputs are stamped onto the document under stable keys, and the final
//! text is scored for sentence n-gram containment against the original.

use futures::future::join_all;
use tracing::{debug, info};

use docstore::{Document, attrs};

use crate::llm::LlmCaller;
use crate::services::base::ServiceError;
use crate::services::usage::UsageCategory;
use crate::text::{
    TextSplitter, clean_backticks_from_llm_response, merge_overlapping_texts,
    sentence_ngram_containment,
};

use super::tech::NarrowingStage;

const MERGE_OVERLAP_CHARS: usize = 300;

const SYSTEM_MESSAGE: &str =
    "You extract one or more direct excerpts from a given text based on \
     the user's request. Maintain all original formatting and characters \
     without any paraphrasing. If the relevant text is inside of a \
     space-delimited table, return the entire table with the original \
     space-delimited formatting. Never paraphrase! Only return portions \
     of the original text directly.";

fn valid_chunk(chunk: &str) -> bool {
    !chunk.trim().is_empty() && !chunk.to_lowercase().contains("no relevant text")
}

/// Runs the narrowing stages for one technology.
pub struct OrdinanceTextExtractor<'a> {
    caller: &'a LlmCaller,
    stages: &'a [NarrowingStage],
}

impl<'a> OrdinanceTextExtractor<'a> {
    pub fn new(caller: &'a LlmCaller, stages: &'a [NarrowingStage]) -> Self {
        Self { caller, stages }
    }

    /// One stage: concurrent extraction over chunks, validity filter,
    /// overlap merge.
    async fn process_stage(
        &self,
        chunks: &[String],
        instructions: &str,
    ) -> Result<String, ServiceError> {
        info!(
            chunks = chunks.len(),
            "extracting ordinance text from chunks"
        );
        let calls = chunks.iter().map(|chunk| {
            let content = format!("Text:\n{chunk}\n{instructions}");
            async move {
                self.caller
                    .call(SYSTEM_MESSAGE, &content, UsageCategory::DocumentOrdinanceSummary)
                    .await
            }
        });
        let outcomes = join_all(calls).await;

        let mut survivors = Vec::new();
        for outcome in outcomes {
            if let Some(response) = outcome? {
                if valid_chunk(&response) {
                    survivors.push(clean_backticks_from_llm_response(&response));
                }
            }
        }
        Ok(merge_overlapping_texts(&survivors, MERGE_OVERLAP_CHARS))
    }

    /// Run every stage, stamping each output onto the document, and
    /// finish with the n-gram containment score of the final text.
    pub async fn extract(
        &self,
        doc: &mut Document,
        splitter: &TextSplitter,
        ngram_size: usize,
    ) -> Result<(), ServiceError> {
        let original = doc.text();
        let mut current = doc
            .attr_str(attrs::ORDINANCE_TEXT)
            .map(|text| text.to_string())
            .unwrap_or_else(|| original.clone());

        for stage in self.stages {
            let chunks = splitter.split(&current);
            if chunks.is_empty() {
                doc.set_attr(stage.key, "");
                continue;
            }
            let narrowed = self.process_stage(&chunks, &stage.instructions).await?;
            debug!(
                stage = stage.key,
                in_chars = current.len(),
                out_chars = narrowed.len(),
                "narrowing stage complete"
            );
            doc.set_attr(stage.key, narrowed.clone());
            current = narrowed;
            if current.trim().is_empty() {
                break;
            }
        }

        let score = sentence_ngram_containment(&original, &current, ngram_size);
        doc.set_attr(attrs::NGRAM_SCORE, score);
        info!(score, "ordinance text narrowed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_chunk_predicate() {
        assert!(valid_chunk("Section 4: setbacks are 1,000 feet."));
        assert!(!valid_chunk(""));
        assert!(!valid_chunk("   \n"));
        assert!(!valid_chunk("No relevant text."));
        assert!(!valid_chunk("There is no relevant text in this chunk."));
    }
}
