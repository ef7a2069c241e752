//! Text tokenizer for full-text search
//!
//! Pipeline: UAX#29 word boundaries → strip possessives → remove non-alphanumeric
//!           → lowercase → filter short tokens → remove stopwords

use std::collections::{BTreeMap, HashSet};
use unicode_segmentation::UnicodeSegmentation;

/// Standard English stopwords (Lucene's default set).
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

#[inline]
fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Strip English possessive suffix (`'s` / `\u{2019}s`).
#[inline]
fn strip_possessive(word: &str) -> &str {
    word.strip_suffix("'s")
        .or_else(|| word.strip_suffix("\u{2019}s"))
        .unwrap_or(word)
}

/// Tokenize text into searchable terms.
///
/// # Example
///
/// ```
/// use turf_engine::extensions::tokenizer::tokenize;
///
/// let tokens = tokenize("The Quick Brown Fox's Tab");
/// assert_eq!(tokens, vec!["quick", "brown", "fox", "tab"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.unicode_words()
        .map(strip_possessive)
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .map(|w| w.to_lowercase())
        .filter(|s| s.chars().count() >= 2)
        .filter(|s| !is_stopword(s))
        .collect()
}

/// Tokenize and deduplicate for query processing, keeping first-seen order.
pub fn tokenize_unique(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Term frequencies of `text`
pub fn term_frequencies(text: &str) -> BTreeMap<String, u32> {
    let mut freqs = BTreeMap::new();
    for token in tokenize(text) {
        *freqs.entry(token).or_insert(0) += 1;
    }
    freqs
}
