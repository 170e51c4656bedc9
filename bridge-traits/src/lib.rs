//! # Host Bridge Traits
//!
//! Capability contracts the shelf client core needs from its host.
//!
//! ## Overview
//!
//! The synchronization core never talks to the network, the session store or
//! the platform logger directly. Each of those lives behind a trait defined
//! here and is injected at the composition root:
//!
//! - [`HttpClient`](http::HttpClient) - one async request/response exchange;
//!   auth headers, timeouts and JSON decoding live on this side of the seam
//! - [`TokenProvider`](auth::TokenProvider) - current bearer token from the
//!   authentication module
//! - [`Clock`](time::Clock) - wall-clock source for timestamps shown to users
//! - [`LoggerSink`](time::LoggerSink) - forwards structured logs to the host
//!
//! ## Error Handling
//!
//! All bridges report failures as [`BridgeError`](error::BridgeError).
//! Implementations should convert platform errors into the closest variant and
//! keep the message actionable; the cache surfaces it verbatim to the UI.
//!
//! ## Thread Safety
//!
//! Every bridge trait requires `Send + Sync`: a single implementation is
//! shared by all fetch tasks the cache spawns.

pub mod auth;
pub mod error;
pub mod http;
pub mod time;

pub use auth::{StaticTokenProvider, TokenProvider};
pub use error::BridgeError;
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, SystemClock};
