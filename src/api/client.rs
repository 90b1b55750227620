//! Authenticated HTTP client for the Raindrop.io REST API
//!
//! Wraps reqwest::Client with bearer token injection from a
//! [`TokenSource`]. A 401 invalidates the source and the request is retried
//! once with a fresh token.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::auth::{AuthError, TokenSource};

pub const BASE_URL: &str = "https://api.raindrop.io/rest/v1";
const USER_AGENT: &str = concat!("raindrop-cli/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No token could be obtained for the request.
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("unauthorized: token may be invalid or expired; check your token at raindrop.io/settings/integrations")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{op}")]
    Request {
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to decode response")]
    Decode(#[source] reqwest::Error),
}

pub struct RaindropClient {
    http: reqwest::Client,
    base_url: String,
    source: Arc<dyn TokenSource>,
}

impl RaindropClient {
    pub fn new(source: Arc<dyn TokenSource>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Request {
                op: "build api client",
                source: e,
            })?;
        Ok(Self {
            http,
            base_url: BASE_URL.to_string(),
            source,
        })
    }

    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// GET `path` and decode the JSON body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.send(Method::GET, path).await?;
        resp.json().await.map_err(ApiError::Decode)
    }

    async fn send(&self, method: Method, path: &str) -> Result<reqwest::Response, ApiError> {
        let url = format!("{}{}", self.base_url, path);

        for attempt in 0..2 {
            let token = self.source.token().await?;
            tracing::debug!("{} {}", method, url);

            let resp = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&token.access_token)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| ApiError::Request {
                    op: "api request",
                    source: e,
                })?;

            match resp.status() {
                StatusCode::UNAUTHORIZED => {
                    self.source.invalidate().await;
                    if attempt == 0 {
                        tracing::debug!("401 from {}, retrying with a fresh token", url);
                        continue;
                    }
                    return Err(ApiError::Unauthorized);
                }
                StatusCode::NOT_FOUND => return Err(ApiError::NotFound),
                StatusCode::TOO_MANY_REQUESTS => return Err(ApiError::RateLimited),
                status if !status.is_success() => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(ApiError::Status {
                        status: status.as_u16(),
                        body: body.trim().to_string(),
                    });
                }
                _ => return Ok(resp),
            }
        }

        Err(ApiError::Unauthorized)
    }
}
