//! Sentence n-gram containment scoring
//!
//! Used as a fidelity score for narrowed ordinance text: the fraction of
//! sentence-level n-grams in the narrowed text that also appear in the
//! original document.

use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "of", "to", "in", "on", "at", "for", "is", "are", "was", "be",
    "by", "as", "from", "with", "that", "this", "it", "its",
];

fn check_word(word: &str) -> bool {
    !word.is_empty()
        && !STOP_WORDS.contains(&word)
        && word.chars().any(|c| c.is_alphanumeric())
}

fn filtered_words(sentence: &str) -> Vec<String> {
    sentence
        .split_whitespace()
        .map(|token| {
            token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|word| check_word(word))
        .collect()
}

/// Split text into sentence-level n-grams of significant words.
///
/// Sentences shorter than `n` significant words contribute a single n-gram
/// containing all of their words.
pub fn convert_text_to_sentence_ngrams(text: &str, n: usize) -> Vec<Vec<String>> {
    let mut ngrams = Vec::new();
    for sentence in text.split(['.', '?', '!', ';']) {
        let words = filtered_words(sentence);
        if words.is_empty() {
            continue;
        }
        if words.len() <= n {
            ngrams.push(words);
            continue;
        }
        for window in words.windows(n) {
            ngrams.push(window.to_vec());
        }
    }
    ngrams
}

/// Fraction of sentence n-grams of `test_text` that also appear in
/// `original`. Empty or stopword-only test text scores `0.0`.
pub fn sentence_ngram_containment(original: &str, test_text: &str, n: usize) -> f64 {
    let test_ngrams = convert_text_to_sentence_ngrams(test_text, n);
    if test_ngrams.is_empty() {
        return 0.0;
    }
    let original_ngrams: HashSet<Vec<String>> =
        convert_text_to_sentence_ngrams(original, n).into_iter().collect();
    let contained = test_ngrams
        .iter()
        .filter(|gram| original_ngrams.contains(*gram))
        .count();
    contained as f64 / test_ngrams.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filtered_words_drops_noise() {
        assert_eq!(
            filtered_words("The solar arrays, and storage!"),
            vec!["solar", "arrays", "storage"]
        );
    }

    #[test]
    fn test_ngrams_per_sentence() {
        let text = "The solar arrays store energy. Solar storage thrives.";
        let grams = convert_text_to_sentence_ngrams(text, 2);
        assert_eq!(
            grams,
            vec![
                vec!["solar", "arrays"],
                vec!["arrays", "store"],
                vec!["store", "energy"],
                vec!["solar", "storage"],
                vec!["storage", "thrives"],
            ]
        );
    }

    #[test]
    fn test_short_sentences_yield_single_gram() {
        let grams = convert_text_to_sentence_ngrams("Wind farms.", 4);
        assert_eq!(grams, vec![vec!["wind", "farms"]]);
    }

    #[test]
    fn test_containment_fraction() {
        let original = "Solar arrays store energy. Batteries support solar arrays.";
        let test_text = "Solar arrays store energy. Solar arrays fail.";
        let score = sentence_ngram_containment(original, test_text, 2);
        assert!((score - 0.8).abs() < 1e-9, "score was {score}");
    }

    #[test]
    fn test_containment_of_empty_input_is_zero() {
        assert_eq!(sentence_ngram_containment("", "The and is", 2), 0.0);
        assert_eq!(sentence_ngram_containment("some text", "", 2), 0.0);
    }

    #[test]
    fn test_full_containment() {
        let text = "All WECS shall be set back one thousand feet from any property line.";
        assert_eq!(sentence_ngram_containment(text, text, 3), 1.0);
    }
}
