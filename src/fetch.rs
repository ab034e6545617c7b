//! HTTP fetching with retry, backoff, and optional extraction-proxy mode.
//!
//! When a proxy endpoint is configured, requests are POSTed to the proxy
//! API with the target URL in a JSON body and the page body comes back
//! base64-encoded. Otherwise the page is fetched with a plain GET.

use base64::Engine;
use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::config::FetchConfig;
use crate::models::RawContent;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("server error (HTTP {0})")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout
                | FetchError::RateLimited
                | FetchError::Status(_)
                | FetchError::Network(_)
        )
    }
}

pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
    api_key: Option<String>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Permanent(format!("failed to build HTTP client: {e}")))?;
        let api_key = config.resolved_api_key();
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    /// Fetch one page, retrying transient failures with exponential backoff.
    pub async fn fetch(&self, url: &str, key: &str) -> Result<RawContent, FetchError> {
        let mut last_err = FetchError::Network("no attempts made".into());
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(500 * (1u64 << (attempt - 1).min(6)));
                tokio::time::sleep(delay).await;
            }
            match self.fetch_once(url).await {
                Ok(body) => {
                    return Ok(RawContent {
                        key: key.to_string(),
                        source_url: Some(url.to_string()),
                        body,
                        fetched_at: Utc::now(),
                    });
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        match &self.config.proxy_endpoint {
            Some(endpoint) => self.fetch_via_proxy(endpoint, url).await,
            None => self.fetch_direct(url).await,
        }
    }

    async fn fetch_direct(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16()));
        }
        response
            .text()
            .await
            .map_err(|e| FetchError::Network(format!("failed to read body: {e}")))
    }

    async fn fetch_via_proxy(&self, endpoint: &str, url: &str) -> Result<String, FetchError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            FetchError::Permanent(
                "proxy endpoint configured but no API key (set fetch.api_key or WATERLINE_API_KEY)"
                    .into(),
            )
        })?;

        let response = self
            .client
            .post(endpoint)
            .basic_auth(api_key, Option::<&str>::None)
            .json(&json!({ "url": url, "httpResponseBody": true }))
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16()));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FetchError::Network(format!("invalid proxy response: {e}")))?;

        let encoded = payload
            .get("httpResponseBody")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                FetchError::Permanent("proxy response missing httpResponseBody".into())
            })?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| FetchError::Permanent(format!("proxy body is not valid base64: {e}")))?;

        String::from_utf8(bytes)
            .map_err(|e| FetchError::Permanent(format!("proxy body is not valid UTF-8: {e}")))
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e.to_string())
    }
}

fn classify_status(code: u16) -> FetchError {
    match code {
        429 => FetchError::RateLimited,
        500..=599 => FetchError::Status(code),
        _ => FetchError::Permanent(format!("HTTP {code}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retryable() {
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::RateLimited.is_retryable());
        assert!(FetchError::Status(503).is_retryable());
        assert!(FetchError::Network("reset".into()).is_retryable());
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!classify_status(404).is_retryable());
        assert!(!classify_status(403).is_retryable());
        assert!(classify_status(429).is_retryable());
        assert!(classify_status(502).is_retryable());
    }
}
