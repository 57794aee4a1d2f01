// Content filtering for relayed chat text.
//
// Matching is substring based, not word based: a listed term is masked
// wherever it appears, including inside longer words ("class" would also
// mask the first five letters of "classic"). This over-matching is known
// and accepted.

use serde_json::Value;

/// Placeholder vocabulary used when no term list is configured.
pub const DEFAULT_TERMS: &[&str] = &[
    "badword1",
    "badword2",
    "badword3",
    "profanity",
    "curse",
    "swear",
    "offensive",
    "inappropriate",
];

pub const DEFAULT_MASK: char = '*';

/// Text filter applied to every relayed chat message.
pub trait ContentFilter: Send + Sync {
    /// Replace every forbidden term with an equal-length run of mask characters.
    fn filter(&self, text: &str) -> String;

    /// Case-insensitive substring test against the forbidden terms.
    fn contains(&self, text: &str) -> bool;

    /// Filter string values; any other JSON value is returned unchanged.
    fn filter_value(&self, value: Value) -> Value {
        match value {
            Value::String(text) => Value::String(self.filter(&text)),
            other => other,
        }
    }
}

/// [`ContentFilter`] backed by a fixed list of terms.
#[derive(Debug, Clone)]
pub struct WordListFilter {
    terms: Vec<Vec<char>>,
    mask: char,
}

impl Default for WordListFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TERMS.iter().copied())
    }
}

impl WordListFilter {
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|term| term.as_ref().trim().chars().collect::<Vec<_>>())
            .filter(|term| !term.is_empty())
            .collect();
        Self { terms, mask: DEFAULT_MASK }
    }

    pub fn with_mask(mut self, mask: char) -> Self {
        self.mask = mask;
        self
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }
}

impl ContentFilter for WordListFilter {
    fn filter(&self, text: &str) -> String {
        // Terms apply in list order, each over the output of the previous one.
        let mut chars: Vec<char> = text.chars().collect();
        for term in &self.terms {
            let mut start = 0;
            while let Some(offset) = find_ignore_case(&chars[start..], term) {
                let at = start + offset;
                chars[at..at + term.len()].fill(self.mask);
                start = at + term.len();
            }
        }
        chars.into_iter().collect()
    }

    fn contains(&self, text: &str) -> bool {
        let chars: Vec<char> = text.chars().collect();
        self.terms.iter().any(|term| find_ignore_case(&chars, term).is_some())
    }
}

fn find_ignore_case(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window.iter().zip(needle).all(|(a, b)| eq_ignore_case(*a, *b)))
}

fn eq_ignore_case(a: char, b: char) -> bool {
    a == b || a.to_lowercase().eq(b.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_text_is_unchanged() {
        let filter = WordListFilter::default();
        assert_eq!(filter.filter("hello there, how are you?"), "hello there, how are you?");
        assert!(!filter.contains("hello there"));
    }

    #[test]
    fn lone_term_becomes_mask_run_of_same_length() {
        let filter = WordListFilter::default();
        assert_eq!(filter.filter("curse"), "*****");
        assert_eq!(filter.filter("inappropriate"), "*".repeat("inappropriate".len()));
    }

    #[test]
    fn matching_ignores_case() {
        let filter = WordListFilter::default();
        assert_eq!(filter.filter("Do not SWEAR here"), "Do not ***** here");
        assert!(filter.contains("ProFaNiTy"));
    }

    #[test]
    fn every_occurrence_is_masked() {
        let filter = WordListFilter::default();
        assert_eq!(filter.filter("curse, curse and Curse"), "*****, ***** and *****");
    }

    #[test]
    fn substring_matches_over_match_inside_words() {
        let filter = WordListFilter::new(["class"]);
        assert_eq!(filter.filter("classic"), "*****ic");
        assert!(filter.contains("subclass"));
    }

    #[test]
    fn non_ascii_text_keeps_char_boundaries() {
        let filter = WordListFilter::new(["bär"]);
        assert_eq!(filter.filter("Großer BÄR!"), "Großer ***!");
    }

    #[test]
    fn empty_terms_are_ignored() {
        let filter = WordListFilter::new(["", "  ", "swear"]);
        assert_eq!(filter.term_count(), 1);
        assert_eq!(filter.filter("abc"), "abc");
    }

    #[test]
    fn custom_mask_character() {
        let filter = WordListFilter::new(["curse"]).with_mask('#');
        assert_eq!(filter.filter("a curse"), "a #####");
    }

    #[test]
    fn non_string_values_pass_through() {
        let filter = WordListFilter::default();
        assert_eq!(filter.filter_value(json!(42)), json!(42));
        assert_eq!(filter.filter_value(json!(null)), json!(null));
        assert_eq!(filter.filter_value(json!({"curse": true})), json!({"curse": true}));
        assert_eq!(filter.filter_value(json!("curse")), json!("*****"));
    }
}
