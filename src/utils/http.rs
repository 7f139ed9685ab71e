//! HTTP client utilities.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use crate::sources::SourceError;

/// Shared HTTP client with sensible defaults and optional rate limiting
#[derive(Clone)]
pub struct HttpClient {
    client: Arc<Client>,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

impl HttpClient {
    /// Create a new HTTP client with default settings
    pub fn new() -> Result<Self, SourceError> {
        Self::with_user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
    }

    /// Create a new HTTP client with a custom user agent
    pub fn with_user_agent(user_agent: &str) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SourceError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::from_client(Arc::new(client)))
    }

    /// Create from an existing reqwest Client
    pub fn from_client(client: Arc<Client>) -> Self {
        Self {
            client,
            limiter: None,
        }
    }

    /// Limit outgoing requests to `requests_per_second` (ignored when not positive)
    pub fn rate_limit(mut self, requests_per_second: f32) -> Self {
        self.limiter = if requests_per_second > 0.0 {
            Quota::with_period(Duration::from_secs_f64(1.0 / requests_per_second as f64))
                .map(|quota| Arc::new(RateLimiter::direct(quota)))
        } else {
            None
        };
        self
    }

    /// Get the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET `url` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::Network(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SourceError::RateLimit);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(SourceError::Api(format!("{} returned status: {}", url, status)));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Failed to parse JSON: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_json_maps_status_codes() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/ok")
            .with_status(200)
            .with_body(r#"{"value": 3}"#)
            .create_async()
            .await;
        let limited = server
            .mock("GET", "/limited")
            .with_status(429)
            .create_async()
            .await;
        let broken = server
            .mock("GET", "/broken")
            .with_status(503)
            .create_async()
            .await;

        let client = HttpClient::new().unwrap();

        let value: serde_json::Value = client
            .get_json(&format!("{}/ok", server.url()))
            .await
            .unwrap();
        assert_eq!(value["value"], 3);

        let err = client
            .get_json::<serde_json::Value>(&format!("{}/limited", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err, SourceError::RateLimit);

        let err = client
            .get_json::<serde_json::Value>(&format!("{}/broken", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Api(_)));

        ok.assert_async().await;
        limited.assert_async().await;
        broken.assert_async().await;
    }

    #[test]
    fn test_rate_limit_disabled_for_zero() {
        let client = HttpClient::new().unwrap().rate_limit(0.0);
        assert!(client.limiter.is_none());

        let client = HttpClient::new().unwrap().rate_limit(2.0);
        assert!(client.limiter.is_some());
    }
}
