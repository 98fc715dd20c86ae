//! Built-in concept lexicon.
//!
//! Without an embedder, "favorite color" and "user prefers blue" share no
//! keyword. Each known word also contributes a `#concept` tag, so related
//! wording overlaps on the tag. The table is small and fixed; deployments
//! wanting real semantic recall plug in an [`Embedder`](crate::Embedder).

use std::collections::BTreeSet;

/// Concept tag and the lowercase words that map to it.
const LEXICON: &[(&str, &[&str])] = &[
    (
        "#color",
        &[
            "color", "colour", "colors", "colours", "red", "blue", "green", "yellow", "purple",
            "orange", "black", "white", "pink", "brown", "gray", "grey", "teal",
        ],
    ),
    (
        "#preference",
        &[
            "favorite", "favourite", "favorites", "prefer", "prefers", "preferred", "preference",
            "like", "likes", "love", "loves", "enjoy", "enjoys",
        ],
    ),
    (
        "#food",
        &[
            "food", "eat", "eats", "meal", "dish", "cuisine", "pizza", "pasta", "sushi", "ramen",
            "vegetarian", "vegan",
        ],
    ),
    ("#drink", &["drink", "drinks", "coffee", "tea", "beverage", "juice"]),
    (
        "#location",
        &["live", "lives", "city", "home", "address", "located", "location", "town"],
    ),
    ("#name", &["name", "named", "called", "nickname"]),
    (
        "#schedule",
        &["meeting", "appointment", "schedule", "calendar", "tomorrow", "today", "deadline"],
    ),
    ("#pet", &["pet", "pets", "dog", "dogs", "cat", "cats"]),
    ("#health", &["allergy", "allergic", "allergies", "diet", "medication"]),
    ("#work", &["work", "works", "job", "employer", "occupation", "office"]),
];

/// The concept tag of one lowercase word, if the lexicon knows it.
pub fn concept_of(word: &str) -> Option<&'static str> {
    LEXICON
        .iter()
        .find(|(_, words)| words.contains(&word))
        .map(|(tag, _)| *tag)
}

/// `terms` plus the concept tag of every known term.
pub fn expand(terms: &BTreeSet<String>) -> BTreeSet<String> {
    let mut out = terms.clone();
    out.extend(terms.iter().filter_map(|t| concept_of(t)).map(str::to_string));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{keyword_overlap, keywords};

    #[test]
    fn known_words_gain_their_tag() {
        let expanded = expand(&keywords("user prefers blue"));
        let got: Vec<_> = expanded.iter().map(String::as_str).collect();
        assert_eq!(got, vec!["#color", "#preference", "blue", "prefers", "user"]);
    }

    #[test]
    fn related_wording_overlaps_on_tags() {
        let query = expand(&keywords("favorite color"));
        let fact = expand(&keywords("user prefers blue"));
        assert!(keyword_overlap(&query, &fact) >= 0.5);

        let unrelated = expand(&keywords("owns a bike"));
        assert!(keyword_overlap(&query, &unrelated).abs() < f32::EPSILON);
    }

    #[test]
    fn one_shared_concept_stays_below_default_threshold() {
        let query = expand(&keywords("favorite food"));
        let fact = expand(&keywords("user prefers blue"));
        assert!(f64::from(keyword_overlap(&query, &fact)) < 0.3);
    }

    #[test]
    fn lexicon_words_map_to_one_tag() {
        let mut seen = BTreeSet::new();
        for (_, words) in LEXICON {
            for word in *words {
                assert!(seen.insert(*word), "{word} listed twice");
            }
        }
    }
}
