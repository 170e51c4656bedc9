//! Remote catalog endpoints.
//!
//! [`CatalogApi`] turns a [`QueryDescriptor`] into one authenticated GET and
//! decodes the `{ total, items }` payload. It performs a single attempt; the
//! cache's fetch executor decides whether to retry.

use crate::error::{fetch_error_from_bridge, CatalogError, Result};
use crate::models::{BookSummary, Genre};
use crate::pagination::PageResponse;
use crate::query::{QueryDescriptor, Resource};

use async_trait::async_trait;
use bridge_traits::auth::TokenProvider;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_async::time::Duration;
use core_cache::FetchError;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

/// A page of books as cached and handed to screens.
pub type BookPage = PageResponse<BookSummary>;

/// Anything that can produce one page for a query.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, query: &QueryDescriptor) -> std::result::Result<BookPage, FetchError>;
}

/// HTTP client for the catalog backend.
pub struct CatalogApi {
    http: Arc<dyn HttpClient>,
    tokens: Arc<dyn TokenProvider>,
    base_url: Url,
    timeout: Option<Duration>,
}

impl CatalogApi {
    /// Creates a client rooted at `base_url` (e.g. `https://api.example.com/v1`).
    pub fn new(
        base_url: &str,
        http: Arc<dyn HttpClient>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| CatalogError::invalid_input("api_base_url", e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(CatalogError::invalid_input(
                "api_base_url",
                format!("{} cannot carry a path", base_url),
            ));
        }

        Ok(Self {
            http,
            tokens,
            base_url,
            timeout: None,
        })
    }

    /// Per-request timeout forwarded to the transport.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// URL for `query`, including the paging and filter parameters.
    pub fn page_url(&self, query: &QueryDescriptor) -> std::result::Result<Url, FetchError> {
        let filter = &query.filter;
        let mut url = match &query.resource {
            Resource::Books => self.endpoint(&["books"]),
            Resource::Favorites => self.endpoint(&["favorites"]),
            Resource::Search => self.endpoint(&["search"]),
            Resource::HomeRow(row) => self.endpoint(&["home", "rows", row.as_str()]),
            Resource::GenreShelf => match filter.genre() {
                Some(genre) => self.endpoint(&["genres", genre, "books"]),
                None => {
                    return Err(FetchError::InvalidRequest(
                        "A genre shelf needs a genre".to_string(),
                    ))
                }
            },
        };

        {
            let mut params = url.query_pairs_mut();
            params
                .append_pair("page", &query.page().to_string())
                .append_pair("size", &query.page_size().to_string())
                .append_pair("lang", filter.language.as_str());
            if query.resource != Resource::GenreShelf {
                if let Some(genre) = filter.genre() {
                    params.append_pair("genre", genre);
                }
            }
            if let Some(search) = filter.normalized_search() {
                params.append_pair("search", &search);
            }
        }

        Ok(url)
    }

    /// Fetches one page.
    ///
    /// A search without text answers an empty page without a request.
    #[instrument(skip(self, query), fields(resource = query.resource_tag(), page = query.page()))]
    pub async fn fetch_page(
        &self,
        query: &QueryDescriptor,
    ) -> std::result::Result<BookPage, FetchError> {
        if query.resource == Resource::Search && query.filter.normalized_search().is_none() {
            debug!("Empty search, skipping request");
            return Ok(BookPage::empty());
        }

        let url = self.page_url(query)?;
        let page: BookPage = self.get_json(url).await?;

        let invalid = page.items.iter().filter(|book| book.validate().is_err()).count();
        if invalid > 0 {
            warn!(invalid, "Page contains malformed books");
        }
        debug!(total = page.total, items = page.items.len(), "Fetched page");
        Ok(page)
    }

    /// All genres, for filter pickers.
    pub async fn genres(&self) -> std::result::Result<Vec<Genre>, FetchError> {
        self.get_json(self.endpoint(&["genres"])).await
    }

    /// Marks or unmarks a book as favorite on the server.
    #[instrument(skip(self))]
    pub async fn set_favorite(
        &self,
        book_id: &str,
        is_favorite: bool,
    ) -> std::result::Result<(), FetchError> {
        if book_id.trim().is_empty() {
            return Err(FetchError::InvalidRequest("Book id cannot be empty".to_string()));
        }

        let method = if is_favorite {
            HttpMethod::Put
        } else {
            HttpMethod::Delete
        };
        let url = self.endpoint(&["favorites", book_id]);
        self.send(HttpRequest::new(method, url.as_str())).await?;
        debug!("Favorite updated");
        Ok(())
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> std::result::Result<T, FetchError> {
        let response = self.send(HttpRequest::get(url.as_str())).await?;
        response
            .json::<T>()
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, FetchError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(fetch_error_from_bridge)?;

        let mut request = request
            .header("Accept", "application/json")
            .bearer_token(token);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = self
            .http
            .execute(request)
            .await
            .map_err(fetch_error_from_bridge)?;

        match response.status {
            status if (200..300).contains(&status) => Ok(response),
            401 => Err(FetchError::Unauthenticated(response.error_message())),
            status => Err(FetchError::Status {
                status,
                message: response.error_message(),
            }),
        }
    }
}

#[async_trait]
impl PageSource for CatalogApi {
    async fn fetch_page(&self, query: &QueryDescriptor) -> std::result::Result<BookPage, FetchError> {
        CatalogApi::fetch_page(self, query).await
    }
}

impl fmt::Debug for CatalogApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogApi")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}
