//! Query descriptors and their cache keys.
//!
//! Every list screen is described by a [`QueryDescriptor`]: a resource, a
//! page request and a [`CatalogFilter`]. The descriptor is the only place
//! cache keys are built, so equal queries always share one entry:
//!
//! ```text
//! books|page:0|size:20|lang:en-US|genre:all|search:none
//! search|page:1|size:20|lang:en|genre:all|search:the+hobbit
//! home-row|page:0|size:20|lang:en|genre:all|search:none|row:trending
//! ```

use crate::pagination::PageRequest;
use crate::models::LanguageCode;

use core_cache::CacheKey;
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

const ALL_GENRES: &str = "all";
const NO_SEARCH: &str = "none";

/// Which list a query pages through. The tag leads the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resource {
    Books,
    Favorites,
    /// Books of the genre selected in the filter
    GenreShelf,
    Search,
    /// A curated home screen row
    HomeRow(String),
}

impl Resource {
    pub fn tag(&self) -> &'static str {
        match self {
            Resource::Books => "books",
            Resource::Favorites => "favorites",
            Resource::GenreShelf => "genre-shelf",
            Resource::Search => "search",
            Resource::HomeRow(_) => "home-row",
        }
    }
}

/// User-controlled filter dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CatalogFilter {
    pub language: LanguageCode,
    pub genre: Option<String>,
    pub search: Option<String>,
}

impl CatalogFilter {
    pub fn new(language: impl Into<LanguageCode>) -> Self {
        Self {
            language: language.into(),
            ..Self::default()
        }
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn genre(&self) -> Option<&str> {
        self.genre
            .as_deref()
            .map(str::trim)
            .filter(|genre| !genre.is_empty())
    }

    /// Search text trimmed, whitespace-collapsed and lowercased; `None`
    /// when blank.
    pub fn normalized_search(&self) -> Option<String> {
        let search = self.search.as_deref()?;
        let normalized = search
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if normalized.is_empty() {
            None
        } else {
            Some(normalized)
        }
    }

    /// Whether two filters select the same data.
    pub fn is_equivalent(&self, other: &CatalogFilter) -> bool {
        self.language == other.language
            && self.genre() == other.genre()
            && self.normalized_search() == other.normalized_search()
    }
}

/// One page of one filtered list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub resource: Resource,
    pub request: PageRequest,
    pub filter: CatalogFilter,
}

impl QueryDescriptor {
    pub fn new(resource: Resource, request: PageRequest, filter: CatalogFilter) -> Self {
        Self {
            resource,
            request,
            filter,
        }
    }

    pub fn page(&self) -> u32 {
        self.request.page
    }

    pub fn page_size(&self) -> u32 {
        self.request.page_size
    }

    /// Same query, different page.
    pub fn with_page(&self, page: u32) -> Self {
        Self {
            request: self.request.with_page(page),
            ..self.clone()
        }
    }

    pub fn resource_tag(&self) -> &'static str {
        self.resource.tag()
    }

    /// Deterministic key for this page.
    pub fn cache_key(&self) -> CacheKey {
        let genre = self
            .filter
            .genre()
            .map(|genre| encode_segment(genre, ALL_GENRES))
            .unwrap_or_else(|| ALL_GENRES.to_string());
        let search = self
            .filter
            .normalized_search()
            .map(|search| encode_segment(&search, NO_SEARCH))
            .unwrap_or_else(|| NO_SEARCH.to_string());

        let key = CacheKey::new(self.resource.tag())
            .with_segment("page", self.request.page)
            .with_segment("size", self.request.page_size)
            .with_segment("lang", &self.filter.language)
            .with_segment("genre", genre)
            .with_segment("search", search);

        match &self.resource {
            Resource::HomeRow(row) => key.with_segment("row", encode_segment(row, "")),
            _ => key,
        }
    }

    /// Key of a neighboring page.
    pub fn neighbor_key(&self, page: u32) -> CacheKey {
        self.with_page(page).cache_key()
    }
}

/// Form-urlencodes `value` so it cannot contain `|`.
///
/// A value that would encode to the placeholder itself gets its first byte
/// percent-encoded instead, so a search for "none" never shares a key with
/// no search at all.
fn encode_segment(value: &str, placeholder: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(value.as_bytes()).collect();
    if !placeholder.is_empty() && encoded == placeholder {
        let mut bytes = encoded.bytes();
        if let Some(first) = bytes.next() {
            let rest: String = bytes.map(char::from).collect();
            return format!("%{:02X}{}", first, rest);
        }
    }
    encoded
}
