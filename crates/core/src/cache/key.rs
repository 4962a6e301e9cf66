//! Deterministic cache keys
//!
//! A key is `source|logical[|k=v&k=v...]` with parameters in sorted order,
//! so the same request always lands on the same entry no matter how the
//! caller built its parameter map.

use std::collections::BTreeMap;

use tributary_common::cache::KeyPattern;

const SEPARATOR: char = '|';

/// Build the cache key for one source's answer to a logical request
pub fn cache_key(source_id: &str, logical_key: &str, params: &BTreeMap<String, String>) -> String {
    let mut key = String::with_capacity(source_id.len() + logical_key.len() + 16 * params.len());
    push_escaped(&mut key, source_id);
    key.push(SEPARATOR);
    push_escaped(&mut key, logical_key);

    if !params.is_empty() {
        key.push(SEPARATOR);
        for (i, (name, value)) in params.iter().enumerate() {
            if i > 0 {
                key.push('&');
            }
            push_escaped(&mut key, name);
            key.push('=');
            push_escaped(&mut key, value);
        }
    }
    key
}

/// Pattern matching every key produced for `source_id`
pub fn source_pattern(source_id: &str) -> Result<KeyPattern, regex::Error> {
    let mut pattern = String::with_capacity(source_id.len() + 2);
    push_escaped(&mut pattern, source_id);
    pattern.push(SEPARATOR);
    pattern.push('*');
    KeyPattern::new(&pattern)
}

// Separators and glob wildcards inside components are percent-encoded so
// a component can never forge a boundary or a pattern.
fn push_escaped(out: &mut String, component: &str) {
    for ch in component.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '|' => out.push_str("%7C"),
            '&' => out.push_str("%26"),
            '=' => out.push_str("%3D"),
            '*' => out.push_str("%2A"),
            '?' => out.push_str("%3F"),
            other => out.push(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_key_is_independent_of_insertion_order() {
        let a = params(&[("vs", "usd"), ("ids", "bitcoin")]);
        let b = params(&[("ids", "bitcoin"), ("vs", "usd")]);
        assert_eq!(cache_key("coingecko", "price", &a), cache_key("coingecko", "price", &b));
        assert_eq!(cache_key("coingecko", "price", &a), "coingecko|price|ids=bitcoin&vs=usd");
    }

    #[test]
    fn test_key_without_params() {
        assert_eq!(cache_key("llama", "tvl", &BTreeMap::new()), "llama|tvl");
    }

    #[test]
    fn test_components_cannot_collide() {
        let left = cache_key("a|b", "c", &BTreeMap::new());
        let right = cache_key("a", "b|c", &BTreeMap::new());
        assert_ne!(left, right);

        let left = cache_key("s", "k", &params(&[("a", "1&b=2")]));
        let right = cache_key("s", "k", &params(&[("a", "1"), ("b", "2")]));
        assert_ne!(left, right);
    }

    #[test]
    fn test_source_pattern_matches_only_that_source() {
        let pattern = source_pattern("velo").unwrap();
        assert!(pattern.is_match(&cache_key("velo", "rates", &params(&[("x", "1")]))));
        assert!(pattern.is_match(&cache_key("velo", "rates", &BTreeMap::new())));
        assert!(!pattern.is_match(&cache_key("velodrome", "rates", &BTreeMap::new())));
    }

    #[test]
    fn test_wildcards_in_source_id_are_literal() {
        let pattern = source_pattern("a*").unwrap();
        assert!(!pattern.is_match(&cache_key("abc", "k", &BTreeMap::new())));
        assert!(pattern.is_match(&cache_key("a*", "k", &BTreeMap::new())));
    }
}
