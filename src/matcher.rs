use regex::Regex;
use std::collections::HashMap;
use std::sync::{LazyLock, PoisonError, RwLock};

/// Compiled glob patterns, `None` for patterns that failed to compile
static PATTERN_CACHE: LazyLock<RwLock<HashMap<String, Option<Regex>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Check a dotted path against a list of glob patterns.
///
/// `*` matches any run of characters, dots included. Every pattern must match the
/// whole path and matching is case-sensitive. An empty pattern list allows nothing.
///
/// ```
/// use querycrate::matcher::is_allowed;
///
/// assert!(is_allowed("comments.title", &["comments.*"]));
/// assert!(!is_allowed("title", &[] as &[&str]));
/// ```
#[must_use]
pub fn is_allowed<S: AsRef<str>>(path: &str, patterns: &[S]) -> bool {
    patterns.iter().any(|pattern| matches_pattern(path, pattern.as_ref()))
}

fn matches_pattern(path: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return path == pattern;
    }
    compiled(pattern).is_some_and(|re| re.is_match(path))
}

fn compiled(pattern: &str) -> Option<Regex> {
    if let Some(cached) = PATTERN_CACHE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(pattern)
    {
        return cached.clone();
    }

    let body = regex::escape(pattern).replace(r"\*", ".*");
    let compiled = match Regex::new(&format!("^{body}$")) {
        Ok(re) => Some(re),
        Err(err) => {
            tracing::warn!(pattern = %pattern, error = %err, "Ignoring unusable allow-list pattern");
            None
        }
    };
    PATTERN_CACHE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(pattern.to_string(), compiled.clone());
    compiled
}
