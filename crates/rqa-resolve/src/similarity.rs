//! Token-set name similarity.

use std::collections::{BTreeSet, HashSet};

/// Compares person names after dropping honorifics, commas and periods.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    honorifics: HashSet<String>,
}

impl Default for NameMatcher {
    fn default() -> Self {
        Self::new(["DR", "PROF", "MR", "MS", "MRS"])
    }
}

impl NameMatcher {
    pub fn new<I, S>(honorifics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            honorifics: honorifics
                .into_iter()
                .map(|h| strip_marks(h.as_ref()).to_uppercase())
                .collect(),
        }
    }

    fn is_honorific(&self, token: &str) -> bool {
        self.honorifics.contains(&strip_marks(token).to_uppercase())
    }

    /// Uppercase, honorific-free token set of a name.
    pub fn tokens(&self, name: &str) -> BTreeSet<String> {
        name.split_whitespace()
            .map(|t| strip_marks(t).to_uppercase())
            .filter(|t| !t.is_empty() && !self.honorifics.contains(t))
            .collect()
    }

    /// Jaccard similarity of the two token sets. Two empty names score 0.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        jaccard(&self.tokens(a), &self.tokens(b))
    }

    /// Letters and digits in the name once honorifics and punctuation are gone.
    pub fn name_length(&self, name: &str) -> usize {
        self.tokens(name).iter().map(|t| t.chars().count()).sum()
    }

    /// Search form of a name: honorifics and single-letter initials removed,
    /// original casing kept.
    pub fn search_form(&self, name: &str) -> String {
        name.split_whitespace()
            .filter(|t| !self.is_honorific(t))
            .map(strip_marks)
            .filter(|t| t.chars().count() > 1)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn strip_marks(token: &str) -> String {
    token.chars().filter(|c| *c != ',' && *c != '.').collect()
}

/// |A ∩ B| / |A ∪ B|.
pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}
