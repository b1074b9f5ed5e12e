use crate::config::EnrichmentConfig;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Class label used when classification was attempted but produced nothing
pub const NA_CLASS: &str = "NA";

/// Confidence value paired with [`NA_CLASS`] in the sentinel result
pub const SENTINEL_CONFIDENCE: f64 = -1.0;

/// Maximum characters of normalized text sent to the classifier
const MAX_TEXT_LEN: usize = 1000;

/// Pause before retrying a non-rate-limit failure
const ERROR_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Outcome of one classification attempt
///
/// The sentinel (`class = "NA"`, `confidence = -1`) means the call was
/// attempted and permanently failed. Records that were never sampled carry
/// no `EnrichmentResult` at all; the two states stay distinguishable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub class: String,
    pub confidence: f64,
    pub processed_at: DateTime<Utc>,
}

impl EnrichmentResult {
    /// The attempted-but-failed sentinel
    pub fn not_usable() -> Self {
        Self {
            class: NA_CLASS.to_string(),
            confidence: SENTINEL_CONFIDENCE,
            processed_at: Utc::now(),
        }
    }

    /// Returns true if this result is the failure sentinel
    pub fn is_sentinel(&self) -> bool {
        self.class == NA_CLASS && self.confidence == SENTINEL_CONFIDENCE
    }
}

/// Wire format of the classification response
#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    response: String,
    #[serde(default)]
    class: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Collapses internal whitespace and truncates to the transmission limit
///
/// Classification operates on normalized text, so two records differing
/// only in whitespace layout score identically.
pub fn normalize_text(text: &str) -> String {
    let joined = text.split_whitespace().collect::<Vec<_>>().join(" ");
    joined.chars().take(MAX_TEXT_LEN).collect()
}

/// Samples records for classification and performs the scoring call
pub struct Sampler {
    http: Client,
    config: EnrichmentConfig,
}

impl Sampler {
    pub fn new(config: EnrichmentConfig) -> crate::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, config })
    }

    /// Decides inclusion with a uniform draw against the sample rate
    pub fn should_sample(&self) -> bool {
        fastrand::f64() < self.config.sample_rate
    }

    /// Scores `text` if the sampling draw selects it
    ///
    /// Returns `None` for excluded items. Excluded is not the same as
    /// failed: the NA sentinel is reserved for attempted calls.
    pub async fn maybe_score(&self, text: &str) -> Option<EnrichmentResult> {
        if !self.should_sample() {
            return None;
        }
        Some(self.score(text).await)
    }

    /// Scores `text`, degrading to the sentinel rather than erroring
    ///
    /// Empty or whitespace-only text short-circuits to the sentinel with no
    /// network call. Rate limits honor the Retry-After hint; other failures
    /// pause briefly. The retry loop is bounded by `max-retries`, after
    /// which the sentinel is returned.
    pub async fn score(&self, text: &str) -> EnrichmentResult {
        let normalized = normalize_text(text);
        if normalized.is_empty() {
            tracing::warn!("Empty text provided for classification");
            return EnrichmentResult::not_usable();
        }

        let mut attempts = 0;
        loop {
            match self.try_score(&normalized).await {
                Ok(result) => return result,
                Err(retry_after) => {
                    if attempts >= self.config.max_retries {
                        tracing::warn!(
                            attempts,
                            "Classification retries exhausted, recording sentinel"
                        );
                        return EnrichmentResult::not_usable();
                    }
                    attempts += 1;
                    tokio::time::sleep(retry_after).await;
                }
            }
        }
    }

    /// One classification attempt; Err carries the pause before the next try
    async fn try_score(&self, text: &str) -> Result<EnrichmentResult, Duration> {
        let response = self
            .http
            .post(&self.config.api_url)
            .json(&serde_json::json!({
                "token": self.config.token,
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Classification request failed: {}", e);
                ERROR_RETRY_PAUSE
            })?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let hint = retry_after_secs(response.headers()).unwrap_or(1);
            tracing::warn!("Classification API rate limit hit, waiting {}s", hint);
            return Err(Duration::from_secs(hint) + Duration::from_millis(100));
        }

        if !response.status().is_success() {
            tracing::error!("Classification API returned HTTP {}", response.status());
            return Err(ERROR_RETRY_PAUSE);
        }

        let parsed: ClassifyResponse = response.json().await.map_err(|e| {
            tracing::error!("Classification response unreadable: {}", e);
            ERROR_RETRY_PAUSE
        })?;

        if parsed.response != "Success" {
            tracing::error!("Unexpected classification response: {}", parsed.response);
            return Err(ERROR_RETRY_PAUSE);
        }

        match (parsed.class, parsed.confidence) {
            (Some(class), Some(confidence)) => Ok(EnrichmentResult {
                class,
                confidence,
                processed_at: Utc::now(),
            }),
            _ => {
                tracing::error!("Classification response missing class or confidence");
                Err(ERROR_RETRY_PAUSE)
            }
        }
    }
}

/// Reads an integral Retry-After header value, if present and positive
pub(crate) fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&v| v > 0)
}
