//! Internal HTTP client for the cluster control-plane API.

use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use url::Url;

use crate::core::domain::error::{OpsError, OpsResult, ValidationError};

/// Client-side rate limiting configuration.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10,
            burst_size: 20,
        }
    }
}

/// Every control-plane payload arrives wrapped in a `data` envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// HTTP client that signs requests with an API token and unwraps the
/// response envelope.
///
/// Authentication is delegated entirely to the token: there is no login
/// flow and no refresh, a rejected token surfaces as an API error. An
/// optional rate limiter smooths bursts against the control plane.
#[derive(Debug)]
pub struct ApiClient {
    http_client: Client,
    base_url: Url,
    token: String,
    rate_limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

/// Builder for [`ApiClient`].
#[derive(Debug, Default)]
pub struct ApiClientBuilder {
    host: Option<String>,
    port: Option<u16>,
    token: Option<String>,
    secure: bool,
    accept_invalid_certs: bool,
    rate_limit: Option<RateLimitConfig>,
}

impl ApiClientBuilder {
    pub fn new() -> Self {
        Self {
            secure: true,
            ..Self::default()
        }
    }

    /// Control-plane host name or address.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// API port; defaults to 8006.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Full API token in `user@realm!tokenid=secret` form.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Use HTTPS (the default) or plain HTTP.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Accept self-signed certificates, common on lab clusters.
    pub fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Enable client-side rate limiting.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    /// Returns `OpsError::Validation` when host or token are missing or
    /// malformed, `OpsError::Internal` if the HTTP client cannot be built.
    pub fn build(self) -> OpsResult<ApiClient> {
        let host = self.host.filter(|h| !h.is_empty()).ok_or_else(|| {
            OpsError::from(ValidationError::Field {
                field: "host".to_string(),
                message: "Host cannot be empty".to_string(),
            })
        })?;
        let token = self.token.filter(|t| !t.is_empty()).ok_or_else(|| {
            OpsError::from(ValidationError::Field {
                field: "token".to_string(),
                message: "API token cannot be empty".to_string(),
            })
        })?;

        let scheme = if self.secure { "https" } else { "http" };
        let port = self.port.unwrap_or(8006);
        let base_url = Url::parse(&format!("{}://{}:{}/", scheme, host, port))
            .map_err(|e| OpsError::from(ValidationError::Format(format!("Invalid host: {}", e))))?;

        let http_client = Client::builder()
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .build()
            .map_err(|e| OpsError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let rate_limiter = self.rate_limit.map(|rl| {
            let quota = Quota::per_second(
                NonZeroU32::new(rl.requests_per_second).unwrap_or(NonZeroU32::MIN),
            )
            .allow_burst(NonZeroU32::new(rl.burst_size).unwrap_or(NonZeroU32::MIN));
            Arc::new(DefaultDirectRateLimiter::direct(quota))
        });

        Ok(ApiClient {
            http_client,
            base_url,
            token,
            rate_limiter,
        })
    }
}

impl ApiClient {
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::new()
    }

    /// Performs a GET request and unwraps the `data` envelope.
    ///
    /// # Errors
    /// Returns `OpsError` if the request fails or the response cannot
    /// be parsed.
    pub async fn get<T>(&self, path: &str) -> OpsResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.execute_request(reqwest::Method::GET, path, None::<&()>)
            .await
    }

    /// Performs a POST request with a form-encoded body and unwraps the
    /// `data` envelope.
    ///
    /// # Errors
    /// Returns `OpsError` if the request fails or the response cannot
    /// be parsed.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> OpsResult<T>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        self.execute_request(reqwest::Method::POST, path, Some(body))
            .await
    }

    async fn execute_request<B, T>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
    ) -> OpsResult<T>
    where
        B: serde::Serialize,
        T: serde::de::DeserializeOwned,
    {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let base = self.base_url.as_str().trim_end_matches('/');
        let url = format!("{}/api2/json/{}", base, path.trim_start_matches('/'));

        let mut req_builder = self
            .http_client
            .request(method, &url)
            .header("Authorization", format!("PVEAPIToken={}", self.token));

        if let Some(body) = body {
            req_builder = req_builder.json(body);
        }

        let response = req_builder.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                OpsError::ProviderUnavailable(format!("Control plane unreachable: {}", e))
            } else {
                OpsError::Internal(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(Self::status_error(status, message));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| OpsError::Internal(format!("Failed to parse response: {}", e)))?;
        Ok(envelope.data)
    }

    /// Maps a non-success HTTP status onto the domain error taxonomy.
    fn status_error(status: StatusCode, message: String) -> OpsError {
        match status.as_u16() {
            400 => OpsError::from(ValidationError::ConstraintViolation(message)),
            404 => OpsError::NotFound(message),
            s if s >= 500 => {
                OpsError::ProviderUnavailable(format!("API error ({}): {}", s, message))
            }
            s => OpsError::Api { status: s, message },
        }
    }
}
