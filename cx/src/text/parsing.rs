//! LLM response parsing and chunk merging

use serde_json::{Map, Value};
use tracing::debug;

/// Strip triple-backtick fences (and a leading language tag) from an LLM
/// response.
pub fn clean_backticks_from_llm_response(response: &str) -> String {
    let content = response.trim();
    let content = content.strip_prefix("```").unwrap_or(content);
    let content = content.strip_prefix("json").unwrap_or(content);
    let content = content.trim_start_matches('\n');
    let content = content.strip_suffix("```").unwrap_or(content);
    content.to_string()
}

/// Parse an LLM response as a JSON object.
///
/// Code fences and a leading `json` language tag are stripped, and Python
/// style `True`/`False` literals are normalized. A response that cannot be
/// parsed yields an empty map; this is deliberately not an error, since the
/// usual cause is the completion running out of tokens.
pub fn llm_response_as_json(response: &str) -> Map<String, Value> {
    let content = clean_backticks_from_llm_response(response)
        .replace("True", "true")
        .replace("False", "false");
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            debug!(response = %other, "LLM returned JSON that is not an object");
            Map::new()
        }
        Err(err) => {
            debug!(
                %err,
                response = %content,
                "LLM returned improperly formatted JSON; a higher token \
                 limit may fix this"
            );
            Map::new()
        }
    }
}

/// Merge chunks of text by removing head-tail overlap.
///
/// For each successor chunk, the last `2n` characters of the accumulated
/// output are searched for the successor's first `n` characters; on a match
/// the successor is spliced in at the match point, otherwise the chunks are
/// joined with a newline. Empty chunks are skipped.
pub fn merge_overlapping_texts<S: AsRef<str>>(chunks: &[S], n: usize) -> String {
    let mut chunks = chunks.iter().map(AsRef::as_ref).filter(|c| !c.is_empty());
    let Some(first) = chunks.next() else {
        return String::new();
    };

    let mut out: Vec<char> = first.chars().collect();
    for next_text in chunks {
        let next: Vec<char> = next_text.chars().collect();
        let probe_len = n.min(next.len());
        let tail_start = out.len().saturating_sub(2 * n);
        match find_subsequence(&out[tail_start..], &next[..probe_len]) {
            Some(pos) => {
                // splice: keep output up to the overlap, then the remainder
                // of the successor past the overlapping probe
                let overlap_in_out = out.len() - tail_start - pos;
                out.extend_from_slice(&next[overlap_in_out.min(next.len())..]);
            }
            None => {
                out.push('\n');
                out.extend_from_slice(&next);
            }
        }
    }
    out.into_iter().collect()
}

fn find_subsequence(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| haystack[i..i + needle.len()] == *needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_backticks() {
        assert_eq!(clean_backticks_from_llm_response("plain text"), "plain text");
        assert_eq!(clean_backticks_from_llm_response("```code```"), "code");
        assert_eq!(clean_backticks_from_llm_response("```\ncode\n```"), "code\n");
        assert_eq!(
            clean_backticks_from_llm_response("  ```json\n{\"a\": 1}```  "),
            "{\"a\": 1}"
        );
        assert_eq!(clean_backticks_from_llm_response("```"), "");
    }

    #[test]
    fn test_llm_response_as_json() {
        let out = llm_response_as_json(" {\"a\": 1} ");
        assert_eq!(out.get("a").and_then(Value::as_i64), Some(1));

        let out = llm_response_as_json("```json\n{\"a\": True, \"b\": False}```");
        assert_eq!(out.get("a").and_then(Value::as_bool), Some(true));
        assert_eq!(out.get("b").and_then(Value::as_bool), Some(false));

        assert!(llm_response_as_json("{\"a\": tru").is_empty());
        assert!(llm_response_as_json("[1, 2, 3]").is_empty());
        assert!(llm_response_as_json("").is_empty());
    }

    #[test]
    fn test_merge_overlapping_texts_with_overlap() {
        let chunks = [
            "Some text. Some overlap. More text that shouldn't be touched. Some overlap.",
            "Some overlap. More text.",
            "Some non-overlapping text.",
        ];
        let merged = merge_overlapping_texts(&chunks, 12);
        assert_eq!(
            merged,
            "Some text. Some overlap. More text that shouldn't be touched. \
             Some overlap. More text.\nSome non-overlapping text."
        );
    }

    #[test]
    fn test_merge_overlapping_texts_edge_cases() {
        let empty: [&str; 0] = [];
        assert_eq!(merge_overlapping_texts(&empty, 300), "");
        assert_eq!(merge_overlapping_texts(&["single chunk"], 300), "single chunk");
        assert_eq!(merge_overlapping_texts(&["", "valid text"], 300), "valid text");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn merge_of_single_chunk_is_identity(chunk in ".{0,200}") {
                prop_assert_eq!(
                    merge_overlapping_texts(&[chunk.clone()], 300),
                    chunk
                );
            }

            #[test]
            fn merge_preserves_the_first_chunk(
                a in "[a-z ]{1,60}",
                b in "[a-z ]{1,60}",
            ) {
                let merged = merge_overlapping_texts(&[a.clone(), b], 8);
                prop_assert!(merged.starts_with(&a));
            }
        }
    }

    #[test]
    fn test_merge_is_left_fold_consistent() {
        // Merging all at once equals a left fold with the same n
        let chunks = ["abcdef", "defghi", "ghijkl"];
        let n = 3;
        let all = merge_overlapping_texts(&chunks, n);
        let folded = merge_overlapping_texts(
            &[merge_overlapping_texts(&chunks[..2], n), chunks[2].to_string()],
            n,
        );
        assert_eq!(all, folded);
        assert_eq!(all, "abcdefghijkl");
    }
}
