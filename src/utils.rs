//! Common utility functions used across the codebase.

/// Truncates a string to at most `max_chars` characters, adding "..." if truncated.
///
/// UTF-8 safe: counts characters, not bytes, so multi-byte input (umlauts,
/// emojis) never splits a code point.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    // Fast path: byte length bounds char count from above.
    if s.len() <= max_chars {
        return s.to_string();
    }
    let char_count = s.chars().count();
    if char_count <= max_chars {
        return s.to_string();
    }

    let suffix = "...";
    let suffix_len = suffix.chars().count();
    if max_chars <= suffix_len {
        return suffix.chars().take(max_chars).collect();
    }
    let truncated: String = s.chars().take(max_chars - suffix_len).collect();
    format!("{}{}", truncated, suffix)
}

/// Lowercased word set of a title, for token-overlap scoring.
pub fn title_tokens(title: &str) -> std::collections::BTreeSet<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Jaccard similarity of two title token sets.
pub fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta = title_tokens(a);
    let tb = title_tokens(b);
    if ta.is_empty() && tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    intersection / union
}

/// Overlap coefficient of two title token sets: shared tokens relative to
/// the smaller title. "Enno Training" vs "Enno Schwimmen" scores 0.5.
pub fn token_overlap(a: &str, b: &str) -> f64 {
    let ta = title_tokens(a);
    let tb = title_tokens(b);
    let smaller = ta.len().min(tb.len());
    if smaller == 0 {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count() as f64;
    intersection / smaller as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_noop_when_short() {
        assert_eq!(truncate_str("hallo", 10), "hallo");
        assert_eq!(truncate_str("", 4), "");
    }

    #[test]
    fn test_truncate_umlauts() {
        assert_eq!(truncate_str("Süßigkeiten-Tüten für alle", 14), "Süßigkeiten...");
    }

    #[test]
    fn test_token_jaccard_identical() {
        assert_eq!(token_jaccard("Enno Training", "Enno Training"), 1.0);
    }

    #[test]
    fn test_token_jaccard_partial_overlap() {
        let score = token_jaccard("Enno Training", "Enno Schwimmen");
        assert!(score > 0.3 && score < 0.4, "got {}", score);
    }

    #[test]
    fn test_token_jaccard_case_and_punctuation() {
        assert_eq!(token_jaccard("Enno: Training!", "enno training"), 1.0);
    }

    #[test]
    fn test_token_jaccard_empty() {
        assert_eq!(token_jaccard("", ""), 0.0);
        assert_eq!(token_jaccard("Enno", ""), 0.0);
    }

    #[test]
    fn test_token_overlap_shared_person() {
        assert_eq!(token_overlap("Enno Training", "Enno Schwimmen"), 0.5);
        assert_eq!(token_overlap("Enno Training", "Enno Training"), 1.0);
        assert_eq!(token_overlap("Enno", "Enno Training Halle"), 1.0);
        assert_eq!(token_overlap("", "Enno"), 0.0);
    }

    mod proptest_truncate {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn truncate_result_within_limit(s in "\\PC{0,200}", n in 0usize..100) {
                let result = truncate_str(&s, n);
                if s.chars().count() > n {
                    prop_assert!(result.chars().count() <= n);
                } else {
                    prop_assert_eq!(result, s);
                }
            }

            #[test]
            fn jaccard_bounded(a in "[a-zA-ZäöüÄÖÜß ]{0,40}", b in "[a-zA-ZäöüÄÖÜß ]{0,40}") {
                let score = token_jaccard(&a, &b);
                prop_assert!((0.0..=1.0).contains(&score));
            }
        }
    }
}
