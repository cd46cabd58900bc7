//! Content validation: keyword heuristics and chunked LLM classification
//! with look-back memory

use std::collections::HashMap;

use tracing::debug;

use crate::llm::StructuredLlmCaller;
use crate::services::base::ServiceError;
use crate::services::usage::UsageCategory;
use crate::text::merge_overlapping_texts;

const MERGE_OVERLAP_CHARS: usize = 300;

/// Contexts an acronym must appear in to count as a match; bare substring
/// hits inside longer words do not count.
const ACRONYM_CONTEXTS: &[&str] = &[
    " {a} ",
    " {a}\n",
    " {a}.",
    "\n{a} ",
    "\n{a}.",
    "\n{a}\n",
    "({a} ",
    " {a})",
];

/// Cheap keyword screen for whether text plausibly concerns a technology.
///
/// Look-alike words are stripped first (e.g. "window" for wind), then
/// keywords, acronyms, and phrases are counted; the text passes when the
/// count strictly exceeds the threshold.
pub struct Heuristic {
    pub not_tech_words: &'static [&'static str],
    pub keywords: &'static [&'static str],
    pub acronyms: &'static [&'static str],
    pub phrases: &'static [&'static str],
    pub match_count_threshold: usize,
}

impl Heuristic {
    pub fn check(&self, text: &str) -> bool {
        let mut screened = text.to_lowercase();
        for word in self.not_tech_words {
            screened = screened.replace(word, "");
        }
        let mut matches = self
            .keywords
            .iter()
            .filter(|kw| screened.contains(**kw))
            .count();
        matches += self.count_acronym_matches(&screened);
        matches += self
            .phrases
            .iter()
            .filter(|phrase| phrase.split(' ').all(|word| screened.contains(word)))
            .count();
        matches > self.match_count_threshold
    }

    fn count_acronym_matches(&self, screened: &str) -> usize {
        for context in ACRONYM_CONTEXTS {
            let hits = self
                .acronyms
                .iter()
                .filter(|acronym| screened.contains(&context.replace("{a}", acronym)))
                .count();
            if hits > 0 {
                return hits;
            }
        }
        0
    }
}

/// Validate text chunks, sometimes looking back at previous chunks.
///
/// Each chunk carries a memo from question key to cached boolean verdict.
/// The memo is monotonic: once a verdict is stored it is never mutated,
/// and a memoized `(chunk, key)` pair never triggers another LLM call.
pub struct ValidationWithMemory {
    caller: StructuredLlmCaller,
    chunks: Vec<String>,
    num_to_recall: usize,
    memory: Vec<HashMap<String, bool>>,
}

impl ValidationWithMemory {
    /// `num_to_recall` counts the original chunk: with a value of 2 the
    /// validator checks the requested chunk and then one chunk before it.
    pub fn new(caller: StructuredLlmCaller, chunks: Vec<String>, num_to_recall: usize) -> Self {
        let memory = vec![HashMap::new(); chunks.len()];
        Self {
            caller,
            chunks,
            num_to_recall: num_to_recall.max(1),
            memory,
        }
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn num_to_recall(&self) -> usize {
        self.num_to_recall
    }

    /// Ask `key` of the chunk at `ind`, walking backwards through the
    /// look-back window. Returns true on the first true verdict; false
    /// only after the window is exhausted.
    ///
    /// The prompt must contain a literal `{key}` placeholder and request a
    /// boolean under that key in the JSON output.
    pub async fn parse_from_ind(
        &mut self,
        ind: usize,
        prompt: &str,
        key: &str,
    ) -> Result<bool, ServiceError> {
        debug!(%key, ind, "checking chunk with look-back");
        for step in 0..self.num_to_recall {
            let Some(idx) = ind.checked_sub(step) else {
                break;
            };
            if idx >= self.chunks.len() {
                continue;
            }
            let verdict = match self.memory[idx].get(key) {
                Some(cached) => *cached,
                None => {
                    let sys_msg = prompt.replace("{key}", key);
                    let content = self.chunks[idx].clone();
                    let response = self
                        .caller
                        .call(&sys_msg, &content, UsageCategory::DocumentContentValidation)
                        .await?;
                    let verdict = response.get(key).and_then(|v| v.as_bool()).unwrap_or(false);
                    self.memory[idx].insert(key.to_string(), verdict);
                    verdict
                }
            };
            if verdict {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// System prompts for the staged chunk classification. Each must contain
/// a `{key}` placeholder for the boolean output key.
#[derive(Debug, Clone)]
pub struct ValidatorPrompts {
    pub is_legal_text: String,
    pub contains_ord: String,
    pub is_utility_scale: String,
}

/// Classifies document chunks for ordinance content, one technology at a
/// time.
///
/// Chunks pass a cheap heuristic screen, then staged LLM checks: legal
/// text, mentions ordinance requirements, applies to the target system
/// scale. Indices of passing chunks are collected; reassembly pulls their
/// look-back neighbours so context is preserved.
pub struct OrdinanceValidator {
    mem: ValidationWithMemory,
    heuristic: &'static Heuristic,
    prompts: ValidatorPrompts,
    legal_text_mem: Vec<bool>,
    mention_mem: Vec<bool>,
    ordinance_chunk_inds: Vec<usize>,
}

impl OrdinanceValidator {
    pub fn new(
        caller: StructuredLlmCaller,
        chunks: Vec<String>,
        num_to_recall: usize,
        heuristic: &'static Heuristic,
        prompts: ValidatorPrompts,
    ) -> Self {
        Self {
            mem: ValidationWithMemory::new(caller, chunks, num_to_recall),
            heuristic,
            prompts,
            legal_text_mem: Vec::new(),
            mention_mem: Vec::new(),
            ordinance_chunk_inds: Vec::new(),
        }
    }

    /// True when a majority of the sampled chunks looked like legal text
    pub fn is_legal_text(&self) -> bool {
        if self.legal_text_mem.is_empty() {
            return false;
        }
        let yes = self.legal_text_mem.iter().filter(|v| **v).count();
        (yes * 2) >= self.legal_text_mem.len()
    }

    /// Combined ordinance text from the passing chunks plus their
    /// look-back neighbours, overlap-merged.
    pub fn ordinance_text(&self) -> String {
        let recall = self.mem.num_to_recall();
        let mut inds: Vec<usize> = self
            .ordinance_chunk_inds
            .iter()
            .flat_map(|ind| {
                let lo = ind.saturating_sub(recall.saturating_sub(1));
                lo..=ind + 1
            })
            .filter(|ind| *ind < self.mem.chunks().len())
            .collect();
        inds.sort_unstable();
        inds.dedup();
        debug!(?inds, "assembling ordinance text from chunk indices");
        let parts: Vec<&String> = inds.iter().map(|ind| &self.mem.chunks()[*ind]).collect();
        merge_overlapping_texts(&parts, MERGE_OVERLAP_CHARS)
    }

    /// Parse chunks looking for ordinance text.
    ///
    /// The first `min_chunks_to_process` chunks are always classified;
    /// after that, documents that do not resemble legal text are abandoned
    /// and chunks failing the heuristic (over the look-back window) are
    /// skipped without an LLM call.
    pub async fn parse(&mut self, min_chunks_to_process: usize) -> Result<bool, ServiceError> {
        for ind in 0..self.mem.chunks().len() {
            let chunk_text = self.mem.chunks()[ind].clone();
            self.mention_mem.push(self.heuristic.check(&chunk_text));

            if ind >= min_chunks_to_process {
                if !self.is_legal_text() {
                    return Ok(false);
                }
                let recall = self.mem.num_to_recall().min(self.mention_mem.len());
                let recent = &self.mention_mem[self.mention_mem.len() - recall..];
                if !recent.iter().any(|v| *v) {
                    continue;
                }
            } else {
                let prompt = self.prompts.is_legal_text.clone();
                let is_legal = self
                    .mem
                    .parse_from_ind(ind, &prompt, "legal_text")
                    .await?;
                self.legal_text_mem.push(is_legal);
                if !is_legal {
                    debug!(ind, "chunk is not legal text");
                    continue;
                }
            }

            let prompt = self.prompts.contains_ord.clone();
            let contains_ord = self
                .mem
                .parse_from_ind(ind, &prompt, "contains_ord_info")
                .await?;
            if !contains_ord {
                debug!(ind, "chunk has no ordinance info");
                continue;
            }

            let prompt = self.prompts.is_utility_scale.clone();
            let utility_scale = self.mem.parse_from_ind(ind, &prompt, "x").await?;
            if !utility_scale {
                debug!(ind, "chunk is not for the target system scale");
                continue;
            }

            self.ordinance_chunk_inds.push(ind);
            // mask the mention so the next chunk is judged on its own text
            if let Some(last) = self.mention_mem.last_mut() {
                *last = false;
            }
        }
        Ok(!self.ordinance_chunk_inds.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static TEST_HEURISTIC: Heuristic = Heuristic {
        not_tech_words: &["window", "wind erosion"],
        keywords: &["wind", "setback"],
        acronyms: &["wecs"],
        phrases: &["wind energy conversion"],
        match_count_threshold: 1,
    };

    #[test]
    fn test_heuristic_rejects_blacklist_only_text() {
        assert!(!TEST_HEURISTIC.check("The window faces wind erosion zones."));
    }

    #[test]
    fn test_heuristic_accepts_real_mentions() {
        assert!(TEST_HEURISTIC.check(
            "Wind energy conversion systems shall observe a setback of 1,000 feet."
        ));
    }

    #[test]
    fn test_heuristic_acronym_requires_context() {
        // "wecs" only counts in delimiter contexts
        assert!(!TEST_HEURISTIC.check("thewecsword appears embedded"));
        assert!(TEST_HEURISTIC.check("All WECS . and every setback"));
    }

    #[test]
    fn test_memory_is_preallocated_per_chunk() {
        let mem = ValidationWithMemory::new(
            StructuredLlmCaller::default(),
            vec!["a".to_string(), "b".to_string()],
            2,
        );
        assert_eq!(mem.memory.len(), 2);
        assert_eq!(mem.num_to_recall(), 2);
    }

    #[tokio::test]
    async fn test_memoized_verdict_skips_llm() {
        // No LlmService is registered, so any real call would error with
        // NotInitialized; a memoized verdict must avoid the call entirely.
        let mut mem = ValidationWithMemory::new(
            StructuredLlmCaller::default(),
            vec!["chunk".to_string()],
            1,
        );
        mem.memory[0].insert("legal_text".to_string(), true);
        let verdict = mem
            .parse_from_ind(0, "Is this legal text? Key: {key}", "legal_text")
            .await
            .expect("memoized verdict requires no llm call");
        assert!(verdict);

        mem.memory[0].insert("contains_ord_info".to_string(), false);
        let verdict = mem
            .parse_from_ind(0, "Does this contain {key}?", "contains_ord_info")
            .await
            .expect("memoized verdict requires no llm call");
        assert!(!verdict);
    }

    #[tokio::test]
    async fn test_lookback_returns_earlier_true() {
        let mut mem = ValidationWithMemory::new(
            StructuredLlmCaller::default(),
            vec!["a".to_string(), "b".to_string()],
            2,
        );
        mem.memory[0].insert("k".to_string(), true);
        mem.memory[1].insert("k".to_string(), false);
        let verdict = mem.parse_from_ind(1, "{key}", "k").await.expect("verdict");
        assert!(verdict, "true verdict in look-back window must surface");
    }

    #[test]
    fn test_ordinance_text_pulls_neighbours() {
        let chunks: Vec<String> = (0..5).map(|i| format!("chunk {i}")).collect();
        let mut validator = OrdinanceValidator::new(
            StructuredLlmCaller::default(),
            chunks,
            2,
            &TEST_HEURISTIC,
            ValidatorPrompts {
                is_legal_text: "{key}".to_string(),
                contains_ord: "{key}".to_string(),
                is_utility_scale: "{key}".to_string(),
            },
        );
        validator.ordinance_chunk_inds.push(2);
        let text = validator.ordinance_text();
        assert!(text.contains("chunk 1"));
        assert!(text.contains("chunk 2"));
        assert!(text.contains("chunk 3"));
        assert!(!text.contains("chunk 0"));
        assert!(!text.contains("chunk 4"));
    }

    #[test]
    fn test_is_legal_text_majority() {
        let mut validator = OrdinanceValidator::new(
            StructuredLlmCaller::default(),
            vec![],
            2,
            &TEST_HEURISTIC,
            ValidatorPrompts {
                is_legal_text: "{key}".to_string(),
                contains_ord: "{key}".to_string(),
                is_utility_scale: "{key}".to_string(),
            },
        );
        assert!(!validator.is_legal_text());
        validator.legal_text_mem = vec![true, false];
        assert!(validator.is_legal_text());
        validator.legal_text_mem = vec![true, false, false];
        assert!(!validator.is_legal_text());
    }
}
