use crate::config::types::{Config, CrawlConfig, EnrichmentConfig, SourceConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawl_config(&config.crawl)?;
    validate_source_config(&config.source)?;
    validate_enrichment_config(&config.enrichment)?;
    validate_paths(config)?;
    validate_units(&config.units)?;
    Ok(())
}

/// Validates crawl behavior settings
fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.post_limit < 1 {
        return Err(ConfigError::Validation(format!(
            "post-limit must be >= 1, got {}",
            config.post_limit
        )));
    }

    if config.max_retry_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max-retry-attempts must be >= 1, got {}",
            config.max_retry_attempts
        )));
    }

    if config.concurrency < 1 || config.concurrency > 32 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 32, got {}",
            config.concurrency
        )));
    }

    if config.discovery_interval_minutes < 1 {
        return Err(ConfigError::Validation(format!(
            "discovery-interval-minutes must be >= 1, got {}",
            config.discovery_interval_minutes
        )));
    }

    if config.retry_interval_minutes < 1 {
        return Err(ConfigError::Validation(format!(
            "retry-interval-minutes must be >= 1, got {}",
            config.retry_interval_minutes
        )));
    }

    Ok(())
}

/// Validates source API settings
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    Url::parse(&config.api_base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid api-base-url: {}", e)))?;

    Url::parse(&config.auth_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid auth-url: {}", e)))?;

    for (name, value) in [
        ("client-id", &config.client_id),
        ("client-secret", &config.client_secret),
        ("username", &config.username),
        ("password", &config.password),
        ("user-agent", &config.user_agent),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", name)));
        }
    }

    Ok(())
}

/// Validates classification service settings
fn validate_enrichment_config(config: &EnrichmentConfig) -> Result<(), ConfigError> {
    Url::parse(&config.api_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid enrichment api-url: {}", e)))?;

    if !(0.0..=1.0).contains(&config.sample_rate) {
        return Err(ConfigError::Validation(format!(
            "sample-rate must be within [0, 1], got {}",
            config.sample_rate
        )));
    }

    if config.token.is_empty() {
        return Err(ConfigError::Validation(
            "enrichment token cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates database paths
fn validate_paths(config: &Config) -> Result<(), ConfigError> {
    if config.queue.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "queue database-path cannot be empty".to_string(),
        ));
    }

    if config.store.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "store database-path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the source unit list
fn validate_units(units: &[String]) -> Result<(), ConfigError> {
    if units.is_empty() {
        return Err(ConfigError::Validation(
            "at least one source unit must be configured".to_string(),
        ));
    }

    for unit in units {
        if unit.is_empty() || !unit.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
            return Err(ConfigError::Validation(format!(
                "unit names must be non-empty and alphanumeric, got '{}'",
                unit
            )));
        }
    }

    Ok(())
}
