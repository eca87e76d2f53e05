//! Token Normalizer
//!
//! Turns free-form listing text into a set of comparable tokens:
//! ASCII folding, lowercase, punctuation stripping, synonym canonicalization
//! and stopword removal. Series vocabulary survives stopword removal even
//! when a word appears in both lists.

use crate::config::VocabularyConfig;
use std::collections::{BTreeSet, HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

/// Normalized token set, ordered for reproducible reasons and logs
pub type TokenSet = BTreeSet<String>;

#[derive(Debug, Clone)]
pub struct TokenNormalizer {
    series: HashSet<String>,
    stopwords: HashSet<String>,
    synonyms: HashMap<String, String>,
}

impl Default for TokenNormalizer {
    fn default() -> Self {
        Self::new(&VocabularyConfig::default())
    }
}

impl TokenNormalizer {
    pub fn new(vocabulary: &VocabularyConfig) -> Self {
        Self {
            series: vocabulary.series.iter().map(|s| s.to_lowercase()).collect(),
            stopwords: vocabulary.stopwords.iter().map(|s| s.to_lowercase()).collect(),
            synonyms: vocabulary
                .synonyms
                .iter()
                .map(|(from, to)| (from.to_lowercase(), to.to_lowercase()))
                .collect(),
        }
    }

    /// Significant tokens of `text`
    pub fn normalize(&self, text: &str) -> TokenSet {
        fold_to_ascii(text)
            .split_whitespace()
            .map(|raw| {
                self.synonyms
                    .get(raw)
                    .cloned()
                    .unwrap_or_else(|| raw.to_string())
            })
            .filter(|token| self.series.contains(token) || !self.stopwords.contains(token))
            .filter(|token| token.len() > 1 || token.chars().all(|c| c.is_ascii_digit()))
            .collect()
    }

    pub fn is_series(&self, token: &str) -> bool {
        self.series.contains(token)
    }

    /// Series vocabulary present in a token set
    pub fn series_tokens<'a>(&self, tokens: &'a TokenSet) -> BTreeSet<&'a str> {
        tokens
            .iter()
            .filter(|t| self.is_series(t))
            .map(String::as_str)
            .collect()
    }
}

/// Decompose, drop combining marks, lowercase, blank out everything that is
/// not `[a-z0-9]`
fn fold_to_ascii(text: &str) -> String {
    text.nfkd()
        .filter(char::is_ascii)
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() {
                c
            } else {
                ' '
            }
        })
        .collect()
}
