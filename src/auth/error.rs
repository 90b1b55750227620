//! Error types for the auth subsystem

use std::time::Duration;

use super::{KEYRING_BACKEND_ENV, KEYRING_PASSWORD_ENV};

/// Errors produced while storing credentials, acquiring tokens, or running
/// the authorization flow.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No usable token: nothing stored, or the stored record holds neither
    /// a test token nor a refresh token.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The token entry is absent from the secret store.
    #[error("no token found")]
    NoToken,

    /// The OAuth client credentials entry is absent from the secret store.
    #[error("no oauth credentials configured")]
    NoCredentials,

    /// Credentials rejected before any backend write.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(&'static str),

    #[error("{op}: {message}")]
    Storage { op: &'static str, message: String },

    #[error(
        "{op}: {message}\n\nYour macOS keychain is locked. Run:\n  security unlock-keychain ~/Library/Keychains/login.keychain-db"
    )]
    KeychainLocked { op: &'static str, message: String },

    #[error(
        "keyring connection timed out after {}s; set {}=file and {}=<password>",
        .after.as_secs(),
        KEYRING_BACKEND_ENV,
        KEYRING_PASSWORD_ENV
    )]
    KeyringTimeout { after: Duration },

    #[error("no TTY available for keyring password prompt; set {}", KEYRING_PASSWORD_ENV)]
    NoTty,

    #[error("invalid keyring backend {0:?} (expected auto, keychain or file)")]
    InvalidBackend(String),

    #[error("failed to decode {what}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The authorization server redirected back with an `error` parameter.
    #[error("authorization error: {0}")]
    Authorization(String),

    #[error("state mismatch")]
    StateMismatch,

    #[error("missing code")]
    MissingCode,

    #[error("no refresh token received")]
    NoRefreshToken,

    /// Non-2xx response from the token endpoint.
    #[error("token exchange failed (HTTP {status}): {body}")]
    TokenExchangeFailed { status: u16, body: String },

    /// The authorization flow deadline elapsed before a redirect arrived.
    #[error("authorization timed out after {}s", .0.as_secs())]
    DeadlineExceeded(Duration),

    /// The caller cancelled the authorization flow (e.g. Ctrl+C).
    #[error("authorization cancelled")]
    Cancelled,

    #[error("failed to listen for callback on {addr}")]
    Listen {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {what}")]
    InvalidUrl {
        what: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("{op}")]
    Request {
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{op}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to generate random bytes: {0}")]
    Random(getrandom::Error),
}

impl AuthError {
    /// Expected "entry absent" conditions from the secret store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AuthError::NoToken | AuthError::NoCredentials)
    }

    /// Errors the user fixes by (re-)authenticating rather than by retrying.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            AuthError::NotAuthenticated
                | AuthError::NoToken
                | AuthError::NoCredentials
                | AuthError::TokenExchangeFailed { .. }
                | AuthError::NoRefreshToken
        )
    }
}
