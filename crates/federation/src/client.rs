//! `ActivityPub` HTTP transport.
//!
//! [`ApTransport`] is the seam between the pipeline and the network: the
//! real [`ApClient`] speaks HTTP with bounded timeouts, while tests plug in
//! a recording stub.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a remote fetch attempt.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The remote object is definitively gone (404/410, unresolvable host).
    /// Callers must tombstone and never re-fetch.
    #[error("Remote object is gone: {0}")]
    Gone(String),
    /// Transient failure (timeout, 5xx, connection reset); retryable.
    #[error("Transient fetch failure: {0}")]
    Transient(String),
}

/// A single delivery POST failure.
#[derive(Debug, thiserror::Error)]
#[error("Delivery to {inbox} failed: {reason}")]
pub struct DeliveryError {
    pub inbox: String,
    pub reason: String,
}

/// Final result of a background fetch, after any retries.
#[derive(Debug)]
pub enum FetchOutcome {
    /// The fetched document.
    Document(Value),
    /// The target is permanently gone.
    Gone,
    /// All attempts failed transiently.
    Failed(String),
}

/// Remote-side operations the pipeline needs.
#[async_trait]
pub trait ApTransport: Send + Sync {
    /// GET an `ActivityPub` document.
    async fn fetch(&self, url: &str) -> Result<Value, FetchError>;

    /// POST a signed activity body to a remote inbox. `headers` carries the
    /// `Host`/`Date`/`Content-Type`/`Signature` set; it may be empty for an
    /// unsigned delivery.
    async fn deliver(
        &self,
        inbox: &str,
        body: &[u8],
        headers: &[(String, String)],
    ) -> Result<(), DeliveryError>;
}

const ACCEPT_HEADER: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

/// HTTP implementation of [`ApTransport`] over reqwest.
#[derive(Clone)]
pub struct ApClient {
    client: Client,
    user_agent: String,
}

impl ApClient {
    /// Create a client with the given per-request timeouts.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client fails to build.
    #[must_use]
    #[allow(clippy::expect_used)] // Client build only fails with incompatible TLS settings
    pub fn new(instance_url: &str, fetch_timeout: Duration, delivery_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(delivery_timeout.max(fetch_timeout))
            .connect_timeout(fetch_timeout)
            .build()
            .expect("Failed to create HTTP client");

        let user_agent = format!("postbox/0.1.0 (+{instance_url})");

        Self { client, user_agent }
    }
}

#[async_trait]
impl ApTransport for ApClient {
    async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
        debug!(url = %url, "Fetching remote document");

        let response = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", ACCEPT_HEADER)
            .send()
            .await
            .map_err(|e| {
                // Connect errors mean the host is unreachable or does not
                // resolve; timeouts are retryable.
                if e.is_timeout() {
                    FetchError::Transient(e.to_string())
                } else if e.is_connect() {
                    FetchError::Gone(e.to_string())
                } else {
                    FetchError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| FetchError::Transient(format!("Invalid JSON body: {e}")))
        } else if status.as_u16() == 404 || status.as_u16() == 410 {
            warn!(url = %url, status = %status, "Remote object is gone");
            Err(FetchError::Gone(format!("HTTP {status}")))
        } else {
            Err(FetchError::Transient(format!("HTTP {status}")))
        }
    }

    async fn deliver(
        &self,
        inbox: &str,
        body: &[u8],
        headers: &[(String, String)],
    ) -> Result<(), DeliveryError> {
        let mut request = self
            .client
            .post(inbox)
            .header("User-Agent", &self.user_agent)
            .header("Accept", "application/activity+json")
            .header("Content-Type", "application/activity+json");
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| DeliveryError {
                inbox: inbox.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            info!(inbox = %inbox, status = %status, "Activity delivered");
            Ok(())
        } else if status.as_u16() == 410 {
            // The remote actor is gone; nothing to retry.
            warn!(inbox = %inbox, "Remote inbox is gone (410)");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DeliveryError {
                inbox: inbox.to_string(),
                reason: format!("HTTP {status}: {body}"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ApClient::new(
            "https://local.example",
            Duration::from_secs(10),
            Duration::from_secs(30),
        );
        assert!(client.user_agent.contains("postbox"));
    }
}
