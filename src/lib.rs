//! Driftnet: a queue-driven crawler for rate-limited content APIs
//!
//! This crate implements a continuously-running crawler that discovers work
//! by diffing successive container snapshots, distributes fetches through a
//! durable job queue, persists records idempotently, and scores a random
//! sample of them through an external classification service.

pub mod config;
pub mod crawl;
pub mod discover;
pub mod enrich;
pub mod queue;
pub mod sink;
pub mod source;

use thiserror::Error;

/// Main error type for driftnet operations
#[derive(Debug, Error)]
pub enum DriftError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication failed with HTTP {status}: {body}")]
    Auth { status: u16, body: String },

    #[error("HTTP error for {url}: {source}")]
    Http { url: String, source: reqwest::Error },

    #[error("Gave up on {url} after {attempts} attempts")]
    PageExhausted { url: String, attempts: u32 },

    #[error("Queue error: {0}")]
    Queue(#[from] queue::QueueError),

    #[error("Sink error: {0}")]
    Sink(#[from] sink::SinkError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for driftnet operations
pub type Result<T> = std::result::Result<T, DriftError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use discover::{diff, ContainerSnapshot};
pub use enrich::EnrichmentResult;
pub use sink::FetchedRecord;
