//! TF-IDF cosine similarity between a caption and its ASR transcript.
//!
//! Both texts form a two-document corpus. Terms are lowercased, stripped of
//! punctuation, filtered against an English stop-word list and reduced by the
//! Snowball English stemmer. IDF uses the smoothed form `ln((1 + n) / (1 + df)) + 1`
//! and each document vector is L2-normalised, so the dot product is the cosine.

use rust_stemmers::{Algorithm, Stemmer};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

const STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "almost", "alone", "along",
    "already", "also", "although", "always", "am", "among", "an", "and", "another", "any",
    "anyhow", "anyone", "anything", "anyway", "anywhere", "are", "around", "as", "at", "be",
    "became", "because", "become", "becomes", "been", "before", "being", "below", "beside",
    "besides", "between", "beyond", "both", "but", "by", "can", "cannot", "could", "did", "do",
    "does", "done", "down", "due", "during", "each", "either", "else", "elsewhere", "enough",
    "etc", "even", "ever", "every", "everyone", "everything", "everywhere", "except", "few",
    "for", "former", "from", "further", "had", "has", "have", "he", "hence", "her", "here",
    "hers", "herself", "him", "himself", "his", "how", "however", "i", "ie", "if", "in",
    "indeed", "into", "is", "it", "its", "itself", "just", "keep", "last", "latter", "least",
    "less", "made", "many", "may", "me", "meanwhile", "might", "mine", "more", "moreover",
    "most", "mostly", "much", "must", "my", "myself", "neither", "never", "nevertheless",
    "next", "no", "nobody", "none", "nor", "not", "nothing", "now", "nowhere", "of", "off",
    "often", "on", "once", "one", "only", "onto", "or", "other", "others", "otherwise", "our",
    "ours", "ourselves", "out", "over", "own", "per", "perhaps", "please", "put", "rather",
    "re", "same", "see", "seem", "seemed", "seeming", "seems", "several", "she", "should",
    "since", "so", "some", "somehow", "someone", "something", "sometime", "sometimes",
    "somewhere", "still", "such", "than", "that", "the", "their", "them", "themselves", "then",
    "thence", "there", "thereafter", "thereby", "therefore", "these", "they", "this", "those",
    "though", "through", "throughout", "thus", "to", "together", "too", "toward", "towards",
    "under", "until", "up", "upon", "us", "very", "via", "was", "we", "well", "were", "what",
    "whatever", "when", "whence", "whenever", "where", "whereas", "wherever", "whether",
    "which", "while", "who", "whoever", "whole", "whom", "whose", "why", "will", "with",
    "within", "without", "would", "yet", "you", "your", "yours", "yourself", "yourselves",
];

/// Split text into normalised terms.
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();

    cleaned
        .split_whitespace()
        .filter(|word| !STOP_WORDS.contains(word))
        .map(stem)
        .filter(|word| !word.is_empty())
        .collect()
}

/// Snowball English stem, so inflections of one word share a term.
fn stem(word: &str) -> String {
    static STEMMER: OnceLock<Stemmer> = OnceLock::new();
    STEMMER
        .get_or_init(|| Stemmer::create(Algorithm::English))
        .stem(word)
        .into_owned()
}

/// Cosine similarity of the TF-IDF vectors of two texts.
///
/// Returns `None` when neither text contains a usable term, the case where
/// no vocabulary can be built.
pub fn tfidf_similarity(a: &str, b: &str) -> Option<f64> {
    let docs = [tokenize(a), tokenize(b)];

    let vocabulary: BTreeSet<&str> = docs.iter().flatten().map(String::as_str).collect();
    if vocabulary.is_empty() {
        return None;
    }

    let n = docs.len() as f64;
    let idf: BTreeMap<&str, f64> = vocabulary
        .iter()
        .map(|&term| {
            let df = docs.iter().filter(|doc| doc.iter().any(|t| t == term)).count() as f64;
            (term, ((1.0 + n) / (1.0 + df)).ln() + 1.0)
        })
        .collect();

    let vectors: Vec<BTreeMap<&str, f64>> = docs
        .iter()
        .map(|doc| {
            let mut counts: BTreeMap<&str, f64> = BTreeMap::new();
            for term in doc {
                *counts.entry(term.as_str()).or_default() += 1.0;
            }
            for (term, weight) in counts.iter_mut() {
                *weight *= idf[term];
            }
            let norm = counts.values().map(|w| w * w).sum::<f64>().sqrt();
            if norm > 0.0 {
                counts.values_mut().for_each(|w| *w /= norm);
            }
            counts
        })
        .collect();

    let dot = vectors[0]
        .iter()
        .filter_map(|(term, w)| vectors[1].get(term).map(|v| w * v))
        .sum::<f64>();
    Some(dot)
}
