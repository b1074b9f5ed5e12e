//! Bearer-token authentication for the content API
//!
//! The upstream API uses an OAuth password grant: client credentials over
//! HTTP basic auth plus a username/password form yield a bearer token with
//! an expiry. Tokens are refreshed with a safety margin so a request never
//! goes out with a token about to lapse mid-flight.

use crate::config::SourceConfig;
use crate::{DriftError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;

/// Refresh this long before the reported expiry
const EXPIRY_MARGIN_SECS: i64 = 60;

/// An access token and its expiry
#[derive(Debug, Clone)]
pub struct BearerToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl BearerToken {
    /// Returns true once the token is within the refresh margin of expiry
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - ChronoDuration::seconds(EXPIRY_MARGIN_SECS)
    }
}

/// Wire format of the token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Tracks authentication state for one client session
pub struct AuthSession {
    config: SourceConfig,
    token: Option<BearerToken>,
}

impl AuthSession {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            token: None,
        }
    }

    /// Authenticates against the token endpoint
    ///
    /// A non-2xx response is a permanent credential failure, not a
    /// retryable condition.
    pub async fn authenticate(&mut self, http: &Client) -> Result<()> {
        let response = http
            .post(&self.config.auth_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "password"),
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DriftError::Http {
                url: self.config.auth_url.clone(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DriftError::Auth {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        self.token = Some(BearerToken {
            access_token: token.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        });

        tracing::info!("Authenticated with content API");
        Ok(())
    }

    /// Returns a valid bearer token, authenticating or refreshing as needed
    pub async fn bearer(&mut self, http: &Client) -> Result<&str> {
        let needs_auth = match &self.token {
            Some(token) => token.needs_refresh(Utc::now()),
            None => true,
        };

        if needs_auth {
            self.authenticate(http).await?;
        }

        // Token is guaranteed present after a successful authenticate
        Ok(self
            .token
            .as_ref()
            .map(|t| t.access_token.as_str())
            .unwrap_or_default())
    }
}
