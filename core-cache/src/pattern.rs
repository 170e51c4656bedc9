//! Invalidation Index: which keys a pattern selects.

use crate::key::SEGMENT_SEPARATOR;

use std::fmt;

/// Selects a group of cache keys for eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Exactly one key.
    Exact(String),
    /// The key itself plus every key extending it by whole segments.
    ///
    /// `favorites` selects `favorites` and `favorites|page:0|...` but not
    /// `favorites-shelf|...`; `books|page:0` selects every key for that
    /// page regardless of the later segments.
    Namespace(String),
    /// Raw substring match anywhere in the key.
    Contains(String),
}

impl KeyPattern {
    pub fn exact(key: impl Into<String>) -> Self {
        Self::Exact(key.into())
    }

    pub fn namespace(prefix: impl Into<String>) -> Self {
        Self::Namespace(prefix.into())
    }

    pub fn contains(needle: impl Into<String>) -> Self {
        Self::Contains(needle.into())
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::Exact(exact) => key == exact,
            KeyPattern::Namespace(prefix) => match key.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.is_empty() || rest.starts_with(SEGMENT_SEPARATOR),
                None => false,
            },
            KeyPattern::Contains(needle) => key.contains(needle.as_str()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            KeyPattern::Exact(s) | KeyPattern::Namespace(s) | KeyPattern::Contains(s) => s,
        }
    }
}

impl From<&str> for KeyPattern {
    fn from(value: &str) -> Self {
        Self::namespace(value)
    }
}

impl From<String> for KeyPattern {
    fn from(value: String) -> Self {
        Self::namespace(value)
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPattern::Exact(s) => write!(f, "={}", s),
            KeyPattern::Namespace(s) => f.write_str(s),
            KeyPattern::Contains(s) => write!(f, "*{}*", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOKS: &str = "books|page:0|size:10|lang:en|genre:all|search:none";
    const FAVORITES: &str = "favorites|page:0|size:10|lang:en|genre:all|search:none";

    #[test]
    fn test_namespace_matches_tag_only() {
        let pattern = KeyPattern::from("favorites");
        assert!(pattern.matches(FAVORITES));
        assert!(pattern.matches("favorites"));
        assert!(!pattern.matches(BOOKS));
        assert!(!pattern.matches("favorites-shelf|page:0"));
    }

    #[test]
    fn test_namespace_on_segment_boundary() {
        let pattern = KeyPattern::namespace("books|page:0");
        assert!(pattern.matches(BOOKS));
        assert!(!pattern.matches("books|page:01|size:10"));
    }

    #[test]
    fn test_exact() {
        let pattern = KeyPattern::exact(BOOKS);
        assert!(pattern.matches(BOOKS));
        assert!(!pattern.matches("books"));
    }

    #[test]
    fn test_contains() {
        let pattern = KeyPattern::contains("lang:en");
        assert!(pattern.matches(BOOKS));
        assert!(pattern.matches(FAVORITES));
        assert!(!pattern.matches("books|page:0|lang:fr"));
    }
}
