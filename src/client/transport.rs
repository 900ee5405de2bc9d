//! HTTP transport for the BigQuery REST API.
//!
//! Epistemic foundation:
//! - K_i: Every resource lives under `{base_url}/projects/{project}/...`
//! - K_i: Non-2xx responses carry a Google error envelope
//! - B_i: API will respond within timeout (might fail)
//! - B_i: Response will be valid JSON (might fail)
//! - I^B: Transient 429/5xx and network failures → retry with backoff

use crate::models::{ApiError, BqError, ClientConfig, Result, is_retryable_status};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Thin RPC layer shared by every handle of a `Client`.
///
/// Features:
/// - Bearer authentication with a pre-minted token
/// - Error envelope decoding into `ApiError`
/// - Retry with exponential backoff for transient failures
/// - Request/retry counters
pub struct Transport {
    client: reqwest::Client,
    /// Bearer token (None for emulators and test stubs)
    access_token: Option<String>,
    /// Base URL without trailing slash
    base_url: String,
    /// Request timeout
    timeout: Duration,
    /// Extra attempts after a transient failure
    max_retries: u32,
    /// First retry delay
    initial_backoff: Duration,
    total_requests: AtomicU64,
    total_retries: AtomicU64,
}

/// Request counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportStats {
    pub total_requests: u64,
    pub total_retries: u64,
}

impl Transport {
    /// Create a transport from client settings.
    pub fn new(config: &ClientConfig, access_token: Option<String>) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BqError::Network)?;

        Ok(Self {
            client,
            access_token,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout,
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            total_requests: AtomicU64::new(0),
            total_retries: AtomicU64::new(0),
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build headers for a request.
    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        if let Some(ref token) = self.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                BqError::InvalidInput("Access token contains invalid header characters".to_string())
            })?;
            headers.insert(AUTHORIZATION, value);
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let body = self.execute(Method::GET, path, query, None::<&()>).await?;
        decode(path, &body)
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.post_with_query(path, &[], body).await
    }

    pub async fn post_with_query<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        body: &B,
    ) -> Result<T> {
        let body = self.execute(Method::POST, path, query, Some(body)).await?;
        decode(path, &body)
    }

    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body = self.execute(Method::PATCH, path, &[], Some(body)).await?;
        decode(path, &body)
    }

    /// DELETE a resource; the service answers with an empty body.
    pub async fn delete(&self, path: &str, query: &[(&str, String)]) -> Result<()> {
        self.execute(Method::DELETE, path, query, None::<&()>)
            .await
            .map(|_| ())
    }

    /// Send a request, retrying transient failures. Returns the success body.
    ///
    /// B_i(API available) → Result
    /// I^B(429/5xx) → exponential backoff, honoring Retry-After
    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<String> {
        let url = format!("{}{path}", self.base_url);
        let headers = self.headers()?;
        let attempts = self.max_retries.saturating_add(1);
        let mut last_error: Option<BqError> = None;

        for attempt in 0..attempts {
            let start = Instant::now();
            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(headers.clone());
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            self.total_requests.fetch_add(1, Ordering::Relaxed);
            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(if e.is_timeout() {
                        BqError::Timeout(self.timeout)
                    } else {
                        BqError::Network(e)
                    });
                    if attempt + 1 < attempts {
                        let backoff = self.backoff(attempt);
                        warn!(
                            method = %method,
                            path = path,
                            attempt = attempt,
                            backoff_ms = backoff.as_millis() as u64,
                            "Retrying after network error"
                        );
                        self.total_retries.fetch_add(1, Ordering::Relaxed);
                        tokio::time::sleep(backoff).await;
                    }
                    continue;
                }
            };

            let status = response.status().as_u16();
            debug!(
                method = %method,
                path = path,
                status = status,
                attempt = attempt,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "BigQuery request"
            );

            if response.status().is_success() {
                return response.text().await.map_err(BqError::Network);
            }

            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64);
            let error_body = response.text().await.unwrap_or_default();
            let error = ApiError::from_response(status, &error_body);

            // Client errors are final: 409 on create, 404 on lookup, 400 on bad queries
            if !is_retryable_status(status) {
                return Err(BqError::Api(error));
            }

            last_error = Some(BqError::Api(error));
            if attempt + 1 < attempts {
                let backoff = retry_after.unwrap_or_else(|| self.backoff(attempt));
                warn!(
                    method = %method,
                    path = path,
                    status = status,
                    attempt = attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Transient API error, retrying"
                );
                self.total_retries.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(backoff).await;
            }
        }

        // All retries exhausted
        Err(last_error.unwrap_or_else(|| {
            BqError::Internal(format!("{method} {path}: no attempt was made"))
        }))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Get request counters.
    pub fn stats(&self) -> TransportStats {
        TransportStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
        }
    }
}

fn decode<T: DeserializeOwned>(path: &str, body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| BqError::ParseError(format!("Failed to parse response from {path}: {e}")))
}
