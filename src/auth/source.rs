//! Token sources
//!
//! Every API request asks a [`TokenSource`] for a bearer token. Which
//! variant backs a client is decided once, when the client is built:
//! a static token (environment override or stored test token), a one-shot
//! refresh exchange right after login, or the caching OAuth source.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{AccessToken, AuthEnv, AuthError, OAuthCredentials, SecretStore, TokenExchange};

#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Produce a currently-valid bearer token.
    async fn token(&self) -> Result<AccessToken, AuthError>;

    /// Drop any cached token so the next `token()` call fetches a new one.
    /// Used after the API answers 401.
    async fn invalidate(&self) {}
}

/// Fixed token from the environment, or the test token in the store.
pub struct StaticTokenSource {
    env_token: Option<String>,
    store: Option<Arc<SecretStore>>,
}

impl StaticTokenSource {
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            env_token: Some(token.into()),
            store: None,
        }
    }

    pub fn from_store(store: Arc<SecretStore>) -> Self {
        Self {
            env_token: None,
            store: Some(store),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<AccessToken, AuthError> {
        if let Some(token) = &self.env_token {
            return Ok(AccessToken::bearer(token.clone()));
        }

        let Some(store) = &self.store else {
            return Err(AuthError::NotAuthenticated);
        };
        match store.get_token() {
            Ok(tok) => tok
                .test_token()
                .map(AccessToken::bearer)
                .ok_or(AuthError::NotAuthenticated),
            Err(e) if e.is_not_found() => Err(AuthError::NotAuthenticated),
            Err(e) => Err(e),
        }
    }
}

/// Exchanges a known refresh token on every call, with no caching.
pub struct RefreshExchangeSource {
    exchange: TokenExchange,
    creds: OAuthCredentials,
    refresh_token: String,
}

impl RefreshExchangeSource {
    pub fn new(exchange: TokenExchange, creds: OAuthCredentials, refresh_token: String) -> Self {
        Self {
            exchange,
            creds,
            refresh_token,
        }
    }
}

#[async_trait]
impl TokenSource for RefreshExchangeSource {
    async fn token(&self) -> Result<AccessToken, AuthError> {
        self.exchange
            .exchange_refresh_token(&self.creds, &self.refresh_token)
            .await
    }
}

/// Keeps the access token in memory and refreshes it from the stored
/// refresh token when it expires or is invalidated.
///
/// The mutex is held across the refresh, so concurrent callers wait for
/// a single exchange instead of racing their own.
pub struct CachingOAuthSource {
    store: Arc<SecretStore>,
    exchange: TokenExchange,
    creds: OAuthCredentials,
    cached: Mutex<Option<AccessToken>>,
}

impl CachingOAuthSource {
    pub fn new(store: Arc<SecretStore>, exchange: TokenExchange, creds: OAuthCredentials) -> Self {
        Self {
            store,
            exchange,
            creds,
            cached: Mutex::new(None),
        }
    }

    async fn refresh(&self) -> Result<AccessToken, AuthError> {
        let stored = match self.store.get_token() {
            Ok(tok) => tok,
            Err(e) if e.is_not_found() => return Err(AuthError::NotAuthenticated),
            Err(e) => return Err(e),
        };
        let Some(refresh_token) = stored.refresh_token() else {
            return Err(AuthError::NotAuthenticated);
        };

        debug!("Refreshing access token");
        let fresh = self
            .exchange
            .exchange_refresh_token(&self.creds, refresh_token)
            .await?;

        if let Some(rotated) = fresh.refresh_token.as_deref() {
            if rotated != refresh_token {
                let mut updated = stored.clone();
                updated.refresh_token = Some(rotated.to_string());
                if let Err(e) = self.store.set_token(updated) {
                    warn!("Failed to store rotated refresh token: {}", e);
                }
            }
        }

        Ok(fresh)
    }
}

#[async_trait]
impl TokenSource for CachingOAuthSource {
    async fn token(&self) -> Result<AccessToken, AuthError> {
        let mut cached = self.cached.lock().await;
        if let Some(tok) = cached.as_ref() {
            if tok.is_fresh_at(Utc::now()) {
                return Ok(tok.clone());
            }
        }

        let fresh = self.refresh().await?;
        *cached = Some(fresh.clone());
        Ok(fresh)
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

/// Build the token source for API calls from the environment and, unless
/// the static override is set, the secret store. `open_store` is only
/// awaited when the store is needed.
pub async fn resolve(
    env: &AuthEnv,
    open_store: impl Future<Output = Result<SecretStore, AuthError>>,
    exchange: TokenExchange,
) -> Result<Arc<dyn TokenSource>, AuthError> {
    if let Some(token) = &env.token_override {
        debug!("Using token from environment");
        return Ok(Arc::new(StaticTokenSource::fixed(token.clone())));
    }
    from_store(Arc::new(open_store.await?), exchange)
}

/// Pick the variant that matches what is in the store.
pub fn from_store(
    store: Arc<SecretStore>,
    exchange: TokenExchange,
) -> Result<Arc<dyn TokenSource>, AuthError> {
    let tok = match store.get_token() {
        Ok(tok) => tok,
        Err(e) if e.is_not_found() => return Err(AuthError::NotAuthenticated),
        Err(e) => return Err(e),
    };

    if tok.test_token().is_some() {
        return Ok(Arc::new(StaticTokenSource::from_store(store)));
    }
    if tok.refresh_token().is_none() {
        return Err(AuthError::NotAuthenticated);
    }

    let creds = store.get_credentials()?;
    Ok(Arc::new(CachingOAuthSource::new(store, exchange, creds)))
}
