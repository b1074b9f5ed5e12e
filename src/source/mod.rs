//! Client for the upstream content API
//!
//! This module handles all interaction with the remote content source:
//! - Bearer-token authentication with proactive refresh before expiry
//! - Paginated listing fetches with rate-limit-aware blocking backoff
//! - Leaf item fetches with iterative traversal of nested reply trees
//! - Normalization of opaque API items into [`FetchedRecord`]s

mod auth;
mod client;

pub use auth::{AuthSession, BearerToken};
pub use client::{build_http_client, ListingPage, SourceClient};
