//! Text utilities: chunking, overlap merging, LLM response cleanup, n-grams

mod ngrams;
mod parsing;
mod splitter;

pub use ngrams::{convert_text_to_sentence_ngrams, sentence_ngram_containment};
pub use parsing::{clean_backticks_from_llm_response, llm_response_as_json, merge_overlapping_texts};
pub use splitter::TextSplitter;
