//! Configuration module for driftnet
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files. Absence of any required option is a startup-fatal error: the
//! process refuses to serve jobs with a partial configuration.

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlConfig, EnrichmentConfig, QueueConfig, SourceConfig, StoreConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// A fully-populated configuration for unit tests
    pub fn sample_config() -> Config {
        Config {
            crawl: CrawlConfig {
                post_limit: 100,
                max_retry_attempts: 5,
                rate_limit_buffer: 5,
                discovery_interval_minutes: 5,
                retry_interval_minutes: 10,
                concurrency: 3,
            },
            source: SourceConfig {
                api_base_url: "https://oauth.example.com".to_string(),
                auth_url: "https://www.example.com/api/v1/access_token".to_string(),
                client_id: "client".to_string(),
                client_secret: "secret".to_string(),
                username: "crawler".to_string(),
                password: "hunter2".to_string(),
                user_agent: "driftnet-test/1.0".to_string(),
            },
            enrichment: EnrichmentConfig {
                api_url: "https://classify.example.com/api/v1/moderate/".to_string(),
                token: "tok".to_string(),
                sample_rate: 0.1,
                max_retries: 3,
            },
            queue: QueueConfig {
                database_path: ":memory:".to_string(),
            },
            store: StoreConfig {
                database_path: ":memory:".to_string(),
            },
            units: vec!["memes".to_string()],
        }
    }
}
