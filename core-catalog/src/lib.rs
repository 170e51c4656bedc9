//! # Catalog
//!
//! Catalog models, remote page fetchers and the pagination prefetch
//! orchestrator.
//!
//! A list screen is described by a [`QueryDescriptor`]; its
//! [`cache_key`](QueryDescriptor::cache_key) is the only way keys are
//! built, so equal queries share one cache entry. [`CatalogApi`] fetches a
//! page over the host [`HttpClient`](bridge_traits::http::HttpClient), and
//! [`PageOrchestrator`] keeps the current page and its neighbours warm in the
//! shared [`QueryCache`](core_cache::QueryCache). [`PageWatcher`] feeds a
//! single page to a screen and follows it as the screen's query changes.

pub mod api;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod pagination;
pub mod query;
pub mod watcher;

pub use api::{BookPage, CatalogApi, PageSource};
pub use error::{CatalogError, Result};
pub use models::{BookSummary, Genre, LanguageCode};
pub use orchestrator::PageOrchestrator;
pub use pagination::{Page, PageRequest, PageResponse};
pub use query::{CatalogFilter, QueryDescriptor, Resource};
pub use watcher::PageWatcher;
