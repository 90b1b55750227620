//! Authentication for the Raindrop.io API
//!
//! Credentials live in a secret store (platform keychain or encrypted file
//! vault). API calls take their bearer token from a [`TokenSource`]; the
//! interactive authorization-code grant is driven by
//! [`AuthorizationFlow`].

pub mod backend;
pub mod callback;
pub mod commands;
pub mod error;
pub mod exchange;
pub mod oauth;
pub mod source;
pub mod store;
pub mod tokens;

pub use error::AuthError;
pub use exchange::TokenExchange;
pub use oauth::{AuthorizationFlow, AuthorizeOptions};
pub use source::{RefreshExchangeSource, StaticTokenSource, TokenSource};
pub use store::SecretStore;
pub use tokens::{AccessToken, OAuthCredentials, Token};

/// Static token override; bypasses the secret store entirely.
pub const TOKEN_ENV: &str = "RAINDROP_TOKEN";
/// Backend selection: `auto`, `keychain` or `file`.
pub const KEYRING_BACKEND_ENV: &str = "RAINDROP_KEYRING_BACKEND";
/// Password for the file vault.
pub const KEYRING_PASSWORD_ENV: &str = "RAINDROP_KEYRING_PASSWORD";
const DBUS_SESSION_ENV: &str = "DBUS_SESSION_BUS_ADDRESS";

/// Environment signals for the auth subsystem, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct AuthEnv {
    pub token_override: Option<String>,
    pub keyring_backend: String,
    pub keyring_password: Option<String>,
    pub dbus_session: Option<String>,
}

impl AuthEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Empty values count as unset.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        Self {
            token_override: get(TOKEN_ENV),
            keyring_backend: get(KEYRING_BACKEND_ENV).unwrap_or_default(),
            keyring_password: get(KEYRING_PASSWORD_ENV),
            dbus_session: get(DBUS_SESSION_ENV),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_lookup_filters_empty_values() {
        let vars: HashMap<&str, &str> = [
            (TOKEN_ENV, ""),
            (KEYRING_BACKEND_ENV, "file"),
            (KEYRING_PASSWORD_ENV, "hunter2"),
        ]
        .into_iter()
        .collect();
        let env = AuthEnv::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(env.token_override, None);
        assert_eq!(env.keyring_backend, "file");
        assert_eq!(env.keyring_password.as_deref(), Some("hunter2"));
        assert_eq!(env.dbus_session, None);
    }
}
