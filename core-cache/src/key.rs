//! Cache keys.
//!
//! A key is a pipe-delimited string: a resource tag followed by ordered
//! `name:value` segments, e.g. `books|page:0|size:20|lang:en`. The caller
//! owns segment order; equal logical queries must append the same segments
//! in the same order.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Separator between the resource tag and each segment.
pub const SEGMENT_SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Starts a key for `resource_tag`.
    pub fn new(resource_tag: impl Into<String>) -> Self {
        Self(resource_tag.into())
    }

    /// Appends a `name:value` segment.
    ///
    /// Values must not contain `|`; encode free text before appending.
    pub fn with_segment(mut self, name: &str, value: impl fmt::Display) -> Self {
        let value = value.to_string();
        debug_assert!(
            !value.contains(SEGMENT_SEPARATOR),
            "segment value must not contain '|'"
        );
        self.0.push(SEGMENT_SEPARATOR);
        self.0.push_str(name);
        self.0.push(':');
        self.0.push_str(&value);
        self
    }

    /// The leading resource tag (`books` in `books|page:0`).
    pub fn resource_tag(&self) -> &str {
        self.0
            .split(SEGMENT_SEPARATOR)
            .next()
            .unwrap_or(self.0.as_str())
    }

    /// Iterates `(name, value)` segments after the resource tag.
    pub fn segments(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .split(SEGMENT_SEPARATOR)
            .skip(1)
            .map(|segment| segment.split_once(':').unwrap_or((segment, "")))
    }

    /// Value of the first segment called `name`.
    pub fn segment(&self, name: &str) -> Option<&str> {
        self.segments()
            .find(|(segment, _)| *segment == name)
            .map(|(_, value)| value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builds_pipe_delimited_key() {
        let key = CacheKey::new("books")
            .with_segment("page", 0)
            .with_segment("size", 20)
            .with_segment("lang", "en");
        assert_eq!(key.as_str(), "books|page:0|size:20|lang:en");
        assert_eq!(key.resource_tag(), "books");
    }

    #[test]
    fn test_equal_queries_produce_equal_keys() {
        let a = CacheKey::new("favorites").with_segment("page", 3);
        let b = CacheKey::new("favorites").with_segment("page", 3);
        assert_eq!(a, b);
        assert_ne!(a, CacheKey::new("favorites").with_segment("page", 4));
    }

    #[test]
    fn test_segment_lookup() {
        let key = CacheKey::from("search|page:1|search:the%20hobbit");
        assert_eq!(key.segment("page"), Some("1"));
        assert_eq!(key.segment("search"), Some("the%20hobbit"));
        assert_eq!(key.segment("genre"), None);
        assert_eq!(key.segments().count(), 2);
    }

    #[test]
    fn test_bare_tag() {
        let key = CacheKey::new("genres");
        assert_eq!(key.resource_tag(), "genres");
        assert_eq!(key.segments().count(), 0);
    }
}
