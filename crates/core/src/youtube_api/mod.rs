//! YouTube Data API v3 access.
//!
//! [`YouTubeApi`] is the session object every strategy and the finder share:
//! it consults the [`ResponseCache`](crate::cache::ResponseCache) first, sends
//! requests through an [`ApiTransport`] on a miss, retries transient failures
//! with backoff, spaces out calls and tracks quota usage.
//!
//! The transport is a trait so the whole search pipeline can run against
//! canned responses; [`HttpTransport`] is the real implementation on top of
//! `reqwest`.

pub mod client;
pub mod transport;
pub mod types;

pub use client::{ClientSettings, YouTubeApi};
pub use transport::{API_BASE_URL, ApiTransport, HttpTransport, classify_error};
