//! # Core Runtime Module
//!
//! Foundational infrastructure shared by every crate of the shelf client
//! core:
//! - Logging and tracing infrastructure
//! - Configuration (cache timings, pagination, bridge wiring)
//! - Event bus carrying auth, catalog and cache events
//!
//! ## Overview
//!
//! Nothing in here knows about cache entries or books. The cache engine and
//! the catalog layer read their defaults from [`config`], report through
//! [`logging`]'s `tracing` setup, and publish/consume [`events`].

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
