//! Glob-style key patterns for cache invalidation
//!
//! `*` matches any run of characters (including none), `?` matches exactly
//! one character, everything else matches literally.

use regex::Regex;

/// Compiled key pattern
#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Any,
    Glob(Regex),
}

impl KeyPattern {
    /// Compile a glob pattern.
    ///
    /// # Errors
    /// Returns the regex error if the translated pattern is too large.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        if pattern == "*" {
            return Ok(Self::any());
        }

        let mut translated = String::with_capacity(pattern.len() + 8);
        translated.push('^');
        let mut literal = [0u8; 4];
        for ch in pattern.chars() {
            match ch {
                '*' => translated.push_str(".*"),
                '?' => translated.push('.'),
                other => translated.push_str(&regex::escape(other.encode_utf8(&mut literal))),
            }
        }
        translated.push('$');

        Ok(Self { source: pattern.to_string(), matcher: Matcher::Glob(Regex::new(&translated)?) })
    }

    /// Pattern matching every key
    pub fn any() -> Self {
        Self { source: "*".to_string(), matcher: Matcher::Any }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, key: &str) -> bool {
        match &self.matcher {
            Matcher::Any => true,
            Matcher::Glob(regex) => regex.is_match(key),
        }
    }

    /// Literal prefix before the first wildcard.
    ///
    /// Shared stores use it to narrow a scan.
    pub fn literal_prefix(&self) -> &str {
        let end = self.source.find(['*', '?']).unwrap_or(self.source.len());
        &self.source[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates glob semantics.
    ///
    /// Assertions:
    /// - Confirms `*` spans any characters and `?` exactly one.
    /// - Confirms regex metacharacters match literally.
    #[test]
    fn test_glob_matching() {
        let pattern = KeyPattern::new("coingecko|prices|*").unwrap();
        assert!(pattern.is_match("coingecko|prices|ids=btc"));
        assert!(pattern.is_match("coingecko|prices|"));
        assert!(!pattern.is_match("llama|prices|ids=btc"));

        let pattern = KeyPattern::new("a?c").unwrap();
        assert!(pattern.is_match("abc"));
        assert!(!pattern.is_match("ac"));

        let pattern = KeyPattern::new("v1.(x)").unwrap();
        assert!(pattern.is_match("v1.(x)"));
        assert!(!pattern.is_match("v1x(x)"));
    }

    /// Validates literal prefix extraction.
    #[test]
    fn test_literal_prefix() {
        assert_eq!(KeyPattern::new("velo|*").unwrap().literal_prefix(), "velo|");
        assert_eq!(KeyPattern::new("exact").unwrap().literal_prefix(), "exact");
        assert_eq!(KeyPattern::any().literal_prefix(), "");
        assert!(KeyPattern::any().is_match("anything"));
    }
}
