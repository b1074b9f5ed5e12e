use serde::Deserialize;

/// Main configuration structure for driftnet
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawl: CrawlConfig,
    pub source: SourceConfig,
    pub enrichment: EnrichmentConfig,
    pub queue: QueueConfig,
    pub store: StoreConfig,
    /// Source units (boards, subforums) to crawl continuously
    pub units: Vec<String>,
}

/// Crawl behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Maximum number of item ids collected per discovery sweep
    #[serde(rename = "post-limit")]
    pub post_limit: u32,

    /// Ledger entries at this many attempts are frozen for triage
    #[serde(rename = "max-retry-attempts")]
    pub max_retry_attempts: u32,

    /// Sleep when the API reports fewer remaining requests than this
    #[serde(rename = "rate-limit-buffer")]
    pub rate_limit_buffer: u32,

    /// Minutes between discovery ticks for one source unit
    #[serde(rename = "discovery-interval-minutes")]
    pub discovery_interval_minutes: u32,

    /// Minutes between retry ledger sweeps
    #[serde(rename = "retry-interval-minutes")]
    pub retry_interval_minutes: u32,

    /// Number of concurrent worker slots pulling jobs
    pub concurrency: u32,
}

/// Content API connection and credentials
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Base URL for authenticated content requests
    #[serde(rename = "api-base-url")]
    pub api_base_url: String,

    /// Token endpoint for the password-grant flow
    #[serde(rename = "auth-url")]
    pub auth_url: String,

    #[serde(rename = "client-id")]
    pub client_id: String,

    #[serde(rename = "client-secret")]
    pub client_secret: String,

    pub username: String,

    pub password: String,

    /// User agent sent on every request; many content APIs reject blanks
    #[serde(rename = "user-agent")]
    pub user_agent: String,
}

/// Classification service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(rename = "api-url")]
    pub api_url: String,

    pub token: String,

    /// Fraction of records submitted for classification, in [0, 1]
    #[serde(rename = "sample-rate")]
    pub sample_rate: f64,

    /// Bounded retry count for rate-limited or failed calls
    #[serde(rename = "max-retries")]
    pub max_retries: u32,
}

/// Job queue database location
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Record store database location
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(rename = "database-path")]
    pub database_path: String,
}
