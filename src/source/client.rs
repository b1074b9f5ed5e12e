//! HTTP client for listing and item fetches
//!
//! All requests share one backoff discipline: HTTP 429 blocks the calling
//! worker slot for the server's Retry-After hint (with a floor when the
//! hint is absent), then retries the same request; rate limiting is
//! backpressure, not failure. Other non-2xx responses retry a bounded
//! number of times before the sweep is abandoned; the next discovery tick
//! retries naturally.

use crate::config::SourceConfig;
use crate::sink::FetchedRecord;
use crate::source::auth::AuthSession;
use crate::{DriftError, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Floor applied when a 429 carries no usable Retry-After hint
const RATE_LIMIT_FLOOR: Duration = Duration::from_secs(10);

/// Pause between retries of non-rate-limit errors
const ERROR_RETRY_PAUSE: Duration = Duration::from_secs(5);

/// Error retries per page before the sweep is abandoned
const MAX_PAGE_ATTEMPTS: u32 = 3;

/// Largest page the listing endpoint will serve
const MAX_PAGE_SIZE: u32 = 100;

/// Builds the HTTP client used for all source API requests
pub fn build_http_client(config: &SourceConfig) -> std::result::Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// One page of a container listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub ids: Vec<String>,
    pub next_cursor: Option<String>,
}

impl ListingPage {
    /// Extracts item ids and the continuation cursor from a listing body
    ///
    /// Items missing an identifier are logged and skipped; one malformed
    /// entry never sinks its page.
    pub fn from_value(value: &Value) -> Self {
        let ids = value
            .get("items")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let id = extract_id(item);
                        if id.is_none() {
                            tracing::warn!("Listing item without id skipped");
                        }
                        id
                    })
                    .collect()
            })
            .unwrap_or_default();

        let next_cursor = value
            .get("next_cursor")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Self { ids, next_cursor }
    }
}

/// Pulls the stable identifier out of an opaque API item
///
/// Accepts string or integer ids; everything else is unusable.
pub fn extract_id(item: &Value) -> Option<String> {
    match item.get("id") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// Flattens an item and its reply tree into normalized records
///
/// Traversal uses an explicit worklist of (value, parent id) pairs, so
/// arbitrarily deep reply chains cost heap, not call stack. Nested replies
/// are removed from each stored payload; children become rows of their own
/// with `parent_id` pointing back.
pub fn normalize_tree(source_unit: &str, root: &Value) -> Vec<FetchedRecord> {
    let mut records = Vec::new();
    let mut worklist: Vec<(&Value, Option<String>)> = Vec::new();

    if let Some(items) = root.get("items").and_then(Value::as_array) {
        for item in items {
            worklist.push((item, None));
        }
    } else if root.is_object() {
        worklist.push((root, None));
    }

    while let Some((value, parent_id)) = worklist.pop() {
        let id = match extract_id(value) {
            Some(id) => id,
            None => {
                // Partial-item failure: skip, keep siblings
                tracing::warn!(source_unit, "Item without id skipped during traversal");
                continue;
            }
        };

        if let Some(replies) = value.get("replies").and_then(Value::as_array) {
            for reply in replies {
                worklist.push((reply, Some(id.clone())));
            }
        }

        let mut payload = value.clone();
        if let Some(obj) = payload.as_object_mut() {
            obj.remove("replies");
        }

        let mut record = FetchedRecord::new(id, source_unit, payload);
        if let Some(parent) = parent_id {
            record = record.with_parent(parent);
        }
        records.push(record);
    }

    records
}

/// Authenticated client for one job's worth of source API calls
///
/// Sessions are cheap and constructed per job; authentication state is
/// never shared across worker slots.
pub struct SourceClient {
    http: Client,
    auth: AuthSession,
    api_base_url: String,
    rate_limit_buffer: u32,
}

impl SourceClient {
    pub fn new(config: SourceConfig, rate_limit_buffer: u32) -> Result<Self> {
        let http = build_http_client(&config)?;
        Ok(Self::with_http(http, config, rate_limit_buffer))
    }

    /// Creates a client around an existing HTTP client (shared pools)
    pub fn with_http(http: Client, config: SourceConfig, rate_limit_buffer: u32) -> Self {
        let api_base_url = config.api_base_url.trim_end_matches('/').to_string();
        Self {
            http,
            auth: AuthSession::new(config),
            api_base_url,
            rate_limit_buffer,
        }
    }

    /// Authenticates eagerly; used at startup to fail fast on bad credentials
    pub async fn authenticate(&mut self) -> Result<()> {
        self.auth.authenticate(&self.http).await
    }

    /// Fetches child item ids from a container listing
    ///
    /// Paginates until the listing is exhausted (empty page or no cursor)
    /// or `limit` ids have been collected.
    pub async fn fetch_listing(&mut self, unit: &str, limit: u32) -> Result<Vec<String>> {
        let mut ids: Vec<String> = Vec::new();
        let mut cursor: Option<String> = None;

        while (ids.len() as u32) < limit {
            let page_size = MAX_PAGE_SIZE.min(limit - ids.len() as u32);
            let mut url = format!(
                "{}/{}/items?limit={}",
                self.api_base_url, unit, page_size
            );
            if let Some(after) = &cursor {
                url.push_str("&after=");
                url.push_str(after);
            }

            let body = self.get_with_backoff(&url).await?;
            let page = ListingPage::from_value(&body);

            if page.ids.is_empty() {
                break;
            }

            tracing::info!(unit, collected = page.ids.len(), "Collected listing page");
            ids.extend(page.ids);

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        Ok(ids)
    }

    /// Fetches one leaf item with its reply tree, normalized into records
    pub async fn fetch_item(&mut self, unit: &str, item_id: &str) -> Result<Vec<FetchedRecord>> {
        let url = format!("{}/{}/items/{}", self.api_base_url, unit, item_id);
        let body = self.get_with_backoff(&url).await?;
        Ok(normalize_tree(unit, &body))
    }

    /// GETs a URL with rate-limit and error backoff
    ///
    /// 429 responses block and retry the same request without consuming the
    /// attempt budget. Other failures consume one attempt each up to
    /// [`MAX_PAGE_ATTEMPTS`].
    async fn get_with_backoff(&mut self, url: &str) -> Result<Value> {
        let mut error_attempts = 0;

        loop {
            let token = self.auth.bearer(&self.http).await?.to_string();
            let response = self.http.get(url).bearer_auth(token).send().await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(url, "Request failed: {}", e);
                    error_attempts += 1;
                    if error_attempts >= MAX_PAGE_ATTEMPTS {
                        return Err(DriftError::PageExhausted {
                            url: url.to_string(),
                            attempts: error_attempts,
                        });
                    }
                    tokio::time::sleep(ERROR_RETRY_PAUSE).await;
                    continue;
                }
            };

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after_hint(response.headers()).unwrap_or(RATE_LIMIT_FLOOR);
                tracing::warn!(url, "Rate limit hit, waiting {:?}", wait);
                tokio::time::sleep(wait).await;
                continue;
            }

            if !response.status().is_success() {
                tracing::error!(url, status = %response.status(), "Unexpected response");
                error_attempts += 1;
                if error_attempts >= MAX_PAGE_ATTEMPTS {
                    return Err(DriftError::PageExhausted {
                        url: url.to_string(),
                        attempts: error_attempts,
                    });
                }
                tokio::time::sleep(ERROR_RETRY_PAUSE).await;
                continue;
            }

            let throttle = throttle_needed(response.headers(), self.rate_limit_buffer);

            match response.json::<Value>().await {
                Ok(body) => {
                    if let Some(wait) = throttle {
                        // Budget is nearly spent; stay under it proactively
                        tracing::warn!(url, "Rate limit budget low, pausing {:?}", wait);
                        tokio::time::sleep(wait).await;
                    }
                    return Ok(body);
                }
                Err(e) => {
                    tracing::error!(url, "Response body unreadable: {}", e);
                    error_attempts += 1;
                    if error_attempts >= MAX_PAGE_ATTEMPTS {
                        return Err(DriftError::PageExhausted {
                            url: url.to_string(),
                            attempts: error_attempts,
                        });
                    }
                    tokio::time::sleep(ERROR_RETRY_PAUSE).await;
                }
            }
        }
    }
}

/// Reads a positive integral Retry-After hint as a duration
fn retry_after_hint(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&secs| secs > 0)
        .map(Duration::from_secs)
}

/// Checks the API's remaining-budget headers against the configured buffer
///
/// Returns the pause to take when fewer requests remain than the buffer,
/// per the upstream's reset hint with the usual floor.
fn throttle_needed(headers: &reqwest::header::HeaderMap, buffer: u32) -> Option<Duration> {
    let remaining = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())?;

    if remaining >= buffer as f64 {
        return None;
    }

    let reset = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);

    Some(Duration::from_secs_f64(
        reset.max(RATE_LIMIT_FLOOR.as_secs_f64()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_id_variants() {
        assert_eq!(extract_id(&json!({"id": "t3_abc"})), Some("t3_abc".to_string()));
        assert_eq!(extract_id(&json!({"id": 12345})), Some("12345".to_string()));
        assert_eq!(extract_id(&json!({"id": ""})), None);
        assert_eq!(extract_id(&json!({"no": 1})), None);
        assert_eq!(extract_id(&json!(null)), None);
    }

    #[test]
    fn test_listing_page_parse() {
        let body = json!({
            "items": [{"id": "a"}, {"id": "b"}, {"title": "no id"}],
            "next_cursor": "cur_2"
        });
        let page = ListingPage::from_value(&body);
        assert_eq!(page.ids, vec!["a", "b"]);
        assert_eq!(page.next_cursor.as_deref(), Some("cur_2"));
    }

    #[test]
    fn test_listing_page_terminal() {
        let page = ListingPage::from_value(&json!({"items": []}));
        assert!(page.ids.is_empty());
        assert!(page.next_cursor.is_none());

        // Empty cursor string means no more pages
        let page = ListingPage::from_value(&json!({"items": [{"id": "a"}], "next_cursor": ""}));
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_normalize_single_item() {
        let records = normalize_tree("memes", &json!({"id": "t1", "text": "hello"}));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "t1");
        assert_eq!(records[0].source_unit, "memes");
        assert!(records[0].parent_id.is_none());
    }

    #[test]
    fn test_normalize_reply_tree() {
        let root = json!({
            "id": "t1",
            "text": "op",
            "replies": [
                {"id": "c1", "text": "first", "replies": [
                    {"id": "c2", "text": "nested"}
                ]},
                {"id": "c3", "text": "second"}
            ]
        });

        let records = normalize_tree("memes", &root);
        assert_eq!(records.len(), 4);

        let by_id = |id: &str| records.iter().find(|r| r.id == id).unwrap();
        assert!(by_id("t1").parent_id.is_none());
        assert_eq!(by_id("c1").parent_id.as_deref(), Some("t1"));
        assert_eq!(by_id("c2").parent_id.as_deref(), Some("c1"));
        assert_eq!(by_id("c3").parent_id.as_deref(), Some("t1"));

        // Stored payloads must not re-embed their children
        assert!(by_id("t1").payload.get("replies").is_none());
    }

    #[test]
    fn test_normalize_skips_malformed_sibling() {
        let root = json!({
            "id": "t1",
            "replies": [
                {"text": "no id here"},
                {"id": "c1", "text": "fine"}
            ]
        });

        let records = normalize_tree("memes", &root);
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.id == "c1"));
    }

    #[test]
    fn test_normalize_deep_chain_is_iterative() {
        // Build a 5000-deep reply chain; recursion would blow the stack
        let mut node = json!({"id": "leaf"});
        for i in 0..5000 {
            node = json!({"id": format!("n{}", i), "replies": [node]});
        }

        let records = normalize_tree("memes", &node);
        assert_eq!(records.len(), 5001);
    }

    #[test]
    fn test_normalize_items_wrapper() {
        let root = json!({"items": [{"id": "p1"}, {"id": "p2"}]});
        let records = normalize_tree("memes", &root);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_retry_after_hint() {
        let mut headers = reqwest::header::HeaderMap::new();
        assert_eq!(retry_after_hint(&headers), None);

        headers.insert(reqwest::header::RETRY_AFTER, "7".parse().unwrap());
        assert_eq!(retry_after_hint(&headers), Some(Duration::from_secs(7)));

        headers.insert(reqwest::header::RETRY_AFTER, "0".parse().unwrap());
        assert_eq!(retry_after_hint(&headers), None);
    }

    #[test]
    fn test_throttle_needed() {
        let mut headers = reqwest::header::HeaderMap::new();
        // No headers: nothing to act on
        assert_eq!(throttle_needed(&headers, 5), None);

        headers.insert("x-ratelimit-remaining", "100".parse().unwrap());
        assert_eq!(throttle_needed(&headers, 5), None);

        headers.insert("x-ratelimit-remaining", "2".parse().unwrap());
        headers.insert("x-ratelimit-reset", "30".parse().unwrap());
        assert_eq!(throttle_needed(&headers, 5), Some(Duration::from_secs(30)));

        // Floor applies when the reset hint is tiny
        headers.insert("x-ratelimit-reset", "1".parse().unwrap());
        assert_eq!(throttle_needed(&headers, 5), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_build_http_client() {
        let config = crate::config::test_support::sample_config().source;
        assert!(build_http_client(&config).is_ok());
    }
}
