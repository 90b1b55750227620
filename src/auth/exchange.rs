//! Token endpoint client
//!
//! The service's token endpoint takes a JSON body rather than the usual
//! form encoding, for both the `authorization_code` and `refresh_token`
//! grants.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AccessToken, AuthError, OAuthCredentials};

pub const TOKEN_URL: &str = "https://raindrop.io/oauth/access_token";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
enum GrantRequest<'a> {
    AuthorizationCode {
        code: &'a str,
        client_id: &'a str,
        client_secret: &'a str,
        redirect_uri: &'a str,
    },
    RefreshToken {
        refresh_token: &'a str,
        client_id: &'a str,
        client_secret: &'a str,
    },
}

/// Response from the token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Stateless client for the two supported grants.
#[derive(Debug, Clone)]
pub struct TokenExchange {
    http: reqwest::Client,
    token_url: String,
}

impl TokenExchange {
    pub fn new() -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AuthError::Request {
                op: "build token client",
                source: e,
            })?;
        Ok(Self {
            http,
            token_url: TOKEN_URL.to_string(),
        })
    }

    #[cfg(test)]
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    /// Exchange an authorization code received on `redirect_uri`.
    pub async fn exchange_code(
        &self,
        creds: &OAuthCredentials,
        redirect_uri: &str,
        code: &str,
    ) -> Result<AccessToken, AuthError> {
        self.request(GrantRequest::AuthorizationCode {
            code,
            client_id: &creds.client_id,
            client_secret: &creds.client_secret,
            redirect_uri,
        })
        .await
    }

    /// Exchange a refresh token for a new access token. The response may
    /// carry a rotated refresh token.
    pub async fn exchange_refresh_token(
        &self,
        creds: &OAuthCredentials,
        refresh_token: &str,
    ) -> Result<AccessToken, AuthError> {
        self.request(GrantRequest::RefreshToken {
            refresh_token,
            client_id: &creds.client_id,
            client_secret: &creds.client_secret,
        })
        .await
    }

    async fn request(&self, grant: GrantRequest<'_>) -> Result<AccessToken, AuthError> {
        tracing::debug!("Requesting token from {}", self.token_url);

        let resp = self
            .http
            .post(&self.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&grant)
            .send()
            .await
            .map_err(|e| AuthError::Request {
                op: "token request",
                source: e,
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchangeFailed {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        let tr: TokenResponse = resp.json().await.map_err(|e| AuthError::Request {
            op: "decode token response",
            source: e,
        })?;

        Ok(AccessToken {
            access_token: tr.access_token,
            refresh_token: tr.refresh_token.filter(|rt| !rt.is_empty()),
            token_type: tr.token_type,
            expiry: AccessToken::expiry_from(tr.expires_in),
        })
    }
}
