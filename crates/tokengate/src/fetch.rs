//! JWKS document retrieval.
//!
//! [`JwksFetcher`] is the seam between the cache and the network. The
//! default [`HttpsJwksFetcher`] performs a resource-constrained HTTPS GET:
//! bounded response size (default 500 KB, enforced both against the
//! declared `Content-Length` and while streaming the body) and bounded
//! latency. Transport failures surface as [`VerifyError::Fetch`] so the
//! cache layer never caches a failure.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Result, VerifyError};

/// Maximum accepted JWKS response size in bytes.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 500 * 1024;

/// End-to-end timeout for a single JWKS request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect timeout for a single JWKS request.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Retrieves raw JWKS bytes for a URI.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    /// Fetch the document at `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Fetch`] on transport failure, a non-2xx
    /// response, or a response exceeding the fetcher's size ceiling.
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>>;
}

/// Default HTTPS fetcher.
#[derive(Clone, Debug)]
pub struct HttpsJwksFetcher {
    client: reqwest::Client,
    max_response_bytes: usize,
}

impl HttpsJwksFetcher {
    /// Create a fetcher with the default limits.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ParameterValidation`] if the HTTP client
    /// cannot be constructed (e.g. no TLS backend available).
    pub fn new() -> Result<Self> {
        Self::with_limits(DEFAULT_REQUEST_TIMEOUT, DEFAULT_MAX_RESPONSE_BYTES)
    }

    /// Create a fetcher with a custom request timeout and size ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::ParameterValidation`] if the HTTP client
    /// cannot be constructed.
    pub fn with_limits(timeout: Duration, max_response_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                VerifyError::ParameterValidation(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client, max_response_bytes })
    }
}

#[async_trait]
impl JwksFetcher for HttpsJwksFetcher {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>> {
        let mut response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| VerifyError::fetch(uri, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::fetch(uri, format!("HTTP {status}")));
        }

        if let Some(length) = response.content_length()
            && length > self.max_response_bytes as u64
        {
            return Err(VerifyError::fetch(
                uri,
                format!("response of {length} bytes exceeds limit of {}", self.max_response_bytes),
            ));
        }

        // Content-Length can lie (or be absent for chunked responses), so
        // the ceiling is enforced while draining the body as well.
        let mut body = Vec::new();
        while let Some(chunk) =
            response.chunk().await.map_err(|e| VerifyError::fetch(uri, e.to_string()))?
        {
            if body.len() + chunk.len() > self.max_response_bytes {
                return Err(VerifyError::fetch(
                    uri,
                    format!("response exceeds limit of {} bytes", self.max_response_bytes),
                ));
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!(uri, bytes = body.len(), "Fetched JWKS document");
        Ok(body)
    }
}
