//! Catalog domain models.
//!
//! Wire shapes use camelCase field names, matching the backend JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Book as it appears in any list screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    /// Length of the audio summary in seconds
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default)]
    pub genre_ids: Vec<String>,
    #[serde(default)]
    pub is_favorite: bool,
}

impl BookSummary {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Book id cannot be empty".to_string());
        }

        if self.title.trim().is_empty() {
            return Err(format!("Book {} has an empty title", self.id));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: String,
    pub name: String,
}

/// Content language as a normalized BCP 47 tag (`en`, `en-US`, `pt-BR`).
///
/// The language subtag is lowercased and a two-letter region uppercased so
/// that `en_us`, `EN-us` and `en-US` produce the same cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageCode(String);

impl LanguageCode {
    pub fn new(tag: &str) -> Self {
        let tag = tag.trim();
        if tag.is_empty() {
            return Self::default();
        }

        let normalized: Vec<String> = tag
            .split(|c| c == '-' || c == '_')
            .filter(|part| !part.is_empty())
            .enumerate()
            .map(|(index, part)| match index {
                0 => part.to_ascii_lowercase(),
                _ if part.len() == 2 => part.to_ascii_uppercase(),
                _ => part.to_string(),
            })
            .collect();
        Self(normalized.join("-"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LanguageCode {
    fn default() -> Self {
        Self("en".to_string())
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LanguageCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
