//! Text normalization, keyword scoring, and vector similarity.

use std::collections::BTreeSet;

/// Words ignored by keyword scoring.
const STOP_WORDS: &[&str] = &[
    "a", "about", "am", "an", "and", "are", "as", "at", "be", "but", "by", "can", "did", "do",
    "does", "for", "from", "had", "has", "have", "he", "her", "his", "how", "i", "if", "in", "is",
    "it", "its", "me", "my", "of", "on", "or", "our", "she", "so", "that", "the", "their", "them",
    "they", "this", "to", "was", "we", "were", "what", "when", "where", "which", "who", "why",
    "will", "with", "you", "your",
];

/// Collapse whitespace and lowercase. Two facts with equal normalized text
/// are duplicates.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Lowercased alphanumeric terms of two or more characters, stop words
/// removed.
pub fn keywords(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() > 1)
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Fraction of query terms present in the fact. Zero for a query with no
/// terms.
#[allow(clippy::cast_precision_loss)]
pub fn keyword_overlap(query: &BTreeSet<String>, fact: &BTreeSet<String>) -> f32 {
    if query.is_empty() {
        return 0.0;
    }
    let hits = query.intersection(fact).count();
    hits as f32 / query.len() as f32
}

/// Compute the L2 (Euclidean) norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity. Vectors of different dimension or zero norm score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPSILON: f32 = 1e-6;

    #[test]
    fn normalize_collapses_and_lowercases() {
        assert_eq!(normalize_text("  Prefers\tBLUE \n"), "prefers blue");
    }

    #[test]
    fn keywords_drop_stop_words_and_punctuation() {
        let terms = keywords("What is my favorite color?");
        assert_eq!(
            terms.into_iter().collect::<Vec<_>>(),
            vec!["color".to_string(), "favorite".to_string()]
        );
    }

    #[test]
    fn overlap_fraction() {
        let query = keywords("favorite color");
        assert!((keyword_overlap(&query, &keywords("my favorite food")) - 0.5).abs() < EPSILON);
        assert!((keyword_overlap(&query, &keywords("color is favorite")) - 1.0).abs() < EPSILON);
        assert!(keyword_overlap(&keywords("the a"), &keywords("anything")).abs() < EPSILON);
    }

    #[test]
    fn cosine_identical_and_orthogonal() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < EPSILON);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]).abs() < EPSILON);
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).abs() < EPSILON);
    }

    proptest! {
        #[test]
        fn cosine_is_bounded(a in prop::collection::vec(-10.0f32..10.0, 4), b in prop::collection::vec(-10.0f32..10.0, 4)) {
            let c = cosine_similarity(&a, &b);
            prop_assert!((-1.0 - 1e-4..=1.0 + 1e-4).contains(&c));
        }
    }
}
