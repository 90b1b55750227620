//! Persisted token records and the in-memory access token

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::AuthError;

/// Token record persisted in the secret store.
///
/// Holds either a test token or a refresh token. When both are present the
/// test token wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Token {
    pub fn test(token: impl Into<String>) -> Self {
        Self {
            test_token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn refresh(token: impl Into<String>) -> Self {
        Self {
            refresh_token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn test_token(&self) -> Option<&str> {
        non_empty(self.test_token.as_deref())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        non_empty(self.refresh_token.as_deref())
    }
}

/// OAuth client registration stored alongside the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

impl OAuthCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: None,
        }
    }

    /// Both the client id and secret must be non-blank.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.client_id.trim().is_empty() {
            return Err(AuthError::InvalidCredentials("missing client id"));
        }
        if self.client_secret.trim().is_empty() {
            return Err(AuthError::InvalidCredentials("missing client secret"));
        }
        Ok(())
    }

    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uri
            .as_deref()
            .filter(|uri| !uri.trim().is_empty())
    }
}

/// Bearer token held in memory only; never written to the secret store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub access_token: String,
    /// Set when the token endpoint returned a (possibly rotated) refresh token.
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    /// `None` when the token endpoint omitted `expires_in`.
    pub expiry: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// A bare bearer token with no expiry, e.g. a test token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            access_token: token.into(),
            refresh_token: None,
            token_type: None,
            expiry: None,
        }
    }

    /// Compute the absolute expiry from a relative `expires_in`, ignoring
    /// missing or non-positive values.
    pub fn expiry_from(expires_in: Option<i64>) -> Option<DateTime<Utc>> {
        expires_in
            .filter(|secs| *secs > 0)
            .map(|secs| Utc::now() + Duration::seconds(secs))
    }

    /// Whether this token may be reused at `now`.
    ///
    /// Tokens without an expiry are never reused.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(exp) => !self.access_token.is_empty() && now < exp,
            None => false,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
