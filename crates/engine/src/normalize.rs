//! Bibliographic text normalization and content hashing
//!
//! The content hash is SHA-256 over normalized title + first-author
//! surname + publication year, so the same study fetched from two
//! sources with cosmetic differences hashes identically.

use sha2::{Digest, Sha256};

/// Normalize a title for comparison: case-folded, punctuation stripped,
/// whitespace collapsed
pub fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_was_space = true;

    for c in title.chars() {
        if c.is_alphanumeric() {
            for lower in c.to_lowercase() {
                out.push(lower);
            }
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }

    while out.ends_with(' ') {
        out.pop();
    }

    out
}

/// Extract a surname from one author name. Handles both "Smith, J." and
/// "Jane Smith" forms.
pub fn author_surname(author: &str) -> String {
    let surname = match author.split_once(',') {
        Some((before, _)) => before,
        None => author.rsplit(char::is_whitespace).next().unwrap_or(author),
    };

    surname
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Surname of the first listed author, empty for an empty author list
pub fn first_author_surname(authors: &[String]) -> String {
    authors.first().map(|a| author_surname(a)).unwrap_or_default()
}

/// SHA-256 content hash over normalized title + first-author surname +
/// year, hex encoded
pub fn content_hash(title: &str, authors: &[String], year: Option<i32>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_title(title).as_bytes());
    hasher.update(b"|");
    hasher.update(first_author_surname(authors).as_bytes());
    hasher.update(b"|");
    hasher.update(year.map(|y| y.to_string()).unwrap_or_default().as_bytes());
    hex::encode(hasher.finalize())
}

/// Normalized-title similarity in [0, 1]
pub fn title_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&normalize_title(a), &normalize_title(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation_and_case() {
        assert_eq!(
            normalize_title("Effects of X: A Randomized-Controlled Trial!"),
            "effects of x a randomized controlled trial"
        );
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_title("  a   b\t c  "), "a b c");
    }

    #[test]
    fn test_surname_comma_form() {
        assert_eq!(author_surname("Smith, Jane A."), "smith");
    }

    #[test]
    fn test_surname_plain_form() {
        assert_eq!(author_surname("Jane A. Smith"), "smith");
    }

    #[test]
    fn test_content_hash_stable_under_formatting() {
        let a = content_hash(
            "Effects of X: a trial",
            &["Smith, Jane".to_string()],
            Some(2021),
        );
        let b = content_hash(
            "EFFECTS of X — a   trial",
            &["Jane Smith".to_string()],
            Some(2021),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_content_hash_differs_by_year() {
        let a = content_hash("Effects of X", &["Smith".to_string()], Some(2021));
        let b = content_hash("Effects of X", &["Smith".to_string()], Some(2022));
        assert_ne!(a, b);
    }

    #[test]
    fn test_title_similarity_identical() {
        assert!((title_similarity("A Trial of X", "a trial of x") - 1.0).abs() < f64::EPSILON);
    }
}
