//! Key matching strategies for pattern queries

use std::collections::HashSet;

use regex::Regex;

use crate::error::{Error, Result};

/// Strategy used by `get_matching` to select keys from a key set
pub trait KeyMatcher: Send + Sync {
    fn matching_keys(&self, pattern: &str, keys: &HashSet<String>) -> Result<HashSet<String>>;
}

/// Regular-expression matcher; the pattern must match the whole key.
#[derive(Debug, Clone, Default)]
pub struct RegexKeyMatcher;

impl RegexKeyMatcher {
    pub fn new() -> Self {
        Self
    }

    fn compile(pattern: &str) -> Result<Regex> {
        Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
    }
}

impl KeyMatcher for RegexKeyMatcher {
    fn matching_keys(&self, pattern: &str, keys: &HashSet<String>) -> Result<HashSet<String>> {
        let regex = Self::compile(pattern)?;
        Ok(keys.iter().filter(|k| regex.is_match(k)).cloned().collect())
    }
}
