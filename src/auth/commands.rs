//! `auth` subcommands

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::oauth::default_redirect_uri;
use super::source;
use super::{
    AuthEnv, AuthError, AuthorizationFlow, AuthorizeOptions, OAuthCredentials,
    RefreshExchangeSource, SecretStore, StaticTokenSource, Token, TokenExchange, TokenSource,
    TOKEN_ENV,
};
use crate::api::RaindropClient;
use crate::config::Config;

/// Bound on the user lookup after login and in `auth status`.
const USER_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

async fn open_store(env: &AuthEnv) -> Result<SecretStore> {
    let keyring_dir = Config::keyring_dir()?;
    let store = SecretStore::open_async(env, &keyring_dir)
        .await
        .context("open keyring")?;
    tracing::debug!("Using {} keyring", store.backend_name());
    Ok(store)
}

/// Store OAuth client credentials, prompting for the secret when omitted.
pub async fn setup(
    env: &AuthEnv,
    config: &Config,
    client_id: String,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
) -> Result<()> {
    let client_secret = match client_secret {
        Some(secret) => secret,
        None => {
            if !std::io::stdin().is_terminal() {
                bail!("no TTY available; use --client-secret flag");
            }
            rpassword::prompt_password("Enter client secret: ").context("read secret")?
        }
    };
    let client_secret = client_secret.trim().to_string();
    if client_secret.is_empty() {
        bail!("client secret cannot be empty");
    }

    let creds = setup_credentials(config, client_id, client_secret, redirect_uri);
    let store = open_store(env).await?;
    store.set_credentials(creds).context("store credentials")?;

    println!("OAuth credentials saved.");
    println!("Run 'raindrop auth login' to authenticate.");
    Ok(())
}

/// A blank redirect URI falls back to the configured callback port.
fn setup_credentials(
    config: &Config,
    client_id: String,
    client_secret: String,
    redirect_uri: Option<String>,
) -> OAuthCredentials {
    let mut creds = OAuthCredentials::new(client_id, client_secret);
    creds.redirect_uri = Some(
        redirect_uri
            .filter(|uri| !uri.trim().is_empty())
            .unwrap_or_else(|| default_redirect_uri(config.oauth_port())),
    );
    creds
}

/// Store a test token.
pub async fn set_token(env: &AuthEnv, token: String) -> Result<()> {
    if token.trim().is_empty() {
        bail!("token is required");
    }
    let store = open_store(env).await?;
    store
        .set_token(Token::test(token.trim()))
        .context("store token")?;

    println!("Token saved successfully.");
    println!("Run 'raindrop auth status' to verify.");
    Ok(())
}

/// Run the authorization-code flow and store the refresh token.
pub async fn login(env: &AuthEnv, config: &Config, manual: bool, timeout: Duration) -> Result<()> {
    let store = open_store(env).await?;
    let creds = store.get_credentials().context("read credentials")?;
    let exchange = TokenExchange::new()?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let opts = AuthorizeOptions {
        manual,
        timeout,
        port: config.oauth_port(),
    };
    tracing::info!("Starting authorization flow...");
    let refresh_token = AuthorizationFlow::new(exchange.clone())
        .authorize(&creds, &opts, cancel)
        .await
        .context("authorization failed")?;

    store
        .set_token(Token::refresh(refresh_token.clone()))
        .context("store token")?;

    let source = RefreshExchangeSource::new(exchange, creds, refresh_token);
    match lookup_user(Arc::new(source)).await {
        Ok(user) => println!("Successfully authenticated as {}", user.full_name),
        Err(e) => {
            tracing::debug!("User lookup after login failed: {:#}", e);
            println!("Authenticated successfully.");
        }
    }
    Ok(())
}

/// What the secret store says about authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    TestToken { since: Option<DateTime<Utc>> },
    OAuth { since: Option<DateTime<Utc>> },
    /// Refresh token stored but no client credentials to use it with.
    ClientMissing,
    /// Client credentials stored but no login yet.
    CredentialsOnly,
    NotAuthenticated,
}

pub fn auth_state(store: &SecretStore) -> Result<AuthState, AuthError> {
    let creds_configured = store.credentials_exist()?;
    let tok = match store.get_token() {
        Ok(tok) => Some(tok),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };

    let state = match tok {
        Some(tok) if tok.test_token().is_some() => AuthState::TestToken {
            since: tok.created_at,
        },
        Some(tok) if tok.refresh_token().is_some() => {
            if creds_configured {
                AuthState::OAuth {
                    since: tok.created_at,
                }
            } else {
                AuthState::ClientMissing
            }
        }
        _ if creds_configured => AuthState::CredentialsOnly,
        _ => AuthState::NotAuthenticated,
    };
    Ok(state)
}

/// Report how the CLI is authenticated and verify it against the API.
pub async fn status(env: &AuthEnv) -> Result<()> {
    if let Some(token) = &env.token_override {
        println!("Using token from {} environment variable", TOKEN_ENV);
        return verify(Arc::new(StaticTokenSource::fixed(token.clone()))).await;
    }

    let store = Arc::new(open_store(env).await?);
    let state = auth_state(&store).context("check credentials")?;
    match &state {
        AuthState::TestToken { since } => {
            println!("Authenticated with test token (since {})", day(since));
        }
        AuthState::OAuth { since } => {
            println!("Authenticated with OAuth (since {})", day(since));
        }
        AuthState::ClientMissing => {
            println!("OAuth token stored but client not configured.");
            println!("Run 'raindrop auth setup <client_id>'.");
            return Ok(());
        }
        AuthState::CredentialsOnly => {
            println!("OAuth credentials configured but not authenticated.");
            println!("Run 'raindrop auth login' to authenticate.");
            return Ok(());
        }
        AuthState::NotAuthenticated => {
            println!("Not authenticated");
            println!(
                "Run 'raindrop auth token <token>' or 'raindrop auth login' to authenticate."
            );
            return Ok(());
        }
    }

    verify(source::from_store(store, TokenExchange::new()?)?).await
}

async fn verify(source: Arc<dyn TokenSource>) -> Result<()> {
    let user = lookup_user(source).await?;
    println!("User: {}", user.full_name);
    println!("Plan: {}", user.plan());
    Ok(())
}

async fn lookup_user(source: Arc<dyn TokenSource>) -> Result<crate::api::User> {
    let client = RaindropClient::new(source)?;
    let user = tokio::time::timeout(USER_LOOKUP_TIMEOUT, client.get_user())
        .await
        .context("user lookup timed out")??;
    Ok(user)
}

fn day(since: &Option<DateTime<Utc>>) -> String {
    since
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Remove the stored token, and with `all` the client credentials too.
pub async fn logout(env: &AuthEnv, all: bool) -> Result<()> {
    let store = open_store(env).await?;
    remove_secrets(&store, all)?;
    if all {
        println!("Removed stored token and OAuth credentials.");
    } else {
        println!("Logged out successfully.");
    }
    Ok(())
}

fn remove_secrets(store: &SecretStore, all: bool) -> Result<()> {
    store.delete_token().context("remove token")?;
    if all {
        store
            .delete_credentials()
            .context("remove credentials")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::backend::memory::MemoryBackend;

    fn store() -> SecretStore {
        SecretStore::with_backend(Box::new(MemoryBackend::new()))
    }

    #[test]
    fn test_state_empty_store() {
        assert_eq!(auth_state(&store()).unwrap(), AuthState::NotAuthenticated);
    }

    #[test]
    fn test_state_test_token_wins() {
        let store = store();
        store
            .set_token(Token {
                refresh_token: Some("r1".into()),
                ..Token::test("t1")
            })
            .unwrap();
        assert!(matches!(
            auth_state(&store).unwrap(),
            AuthState::TestToken { since: Some(_) }
        ));
    }

    #[test]
    fn test_state_oauth_needs_client() {
        let store = store();
        store.set_token(Token::refresh("r1")).unwrap();
        assert_eq!(auth_state(&store).unwrap(), AuthState::ClientMissing);

        store
            .set_credentials(OAuthCredentials::new("abc", "xyz"))
            .unwrap();
        assert!(matches!(
            auth_state(&store).unwrap(),
            AuthState::OAuth { .. }
        ));
    }

    #[test]
    fn test_state_credentials_only() {
        let store = store();
        store
            .set_credentials(OAuthCredentials::new("abc", "xyz"))
            .unwrap();
        assert_eq!(auth_state(&store).unwrap(), AuthState::CredentialsOnly);

        store.set_token(Token::default()).unwrap();
        assert_eq!(auth_state(&store).unwrap(), AuthState::CredentialsOnly);
    }

    #[test]
    fn test_remove_secrets() {
        let store = store();
        store.set_token(Token::refresh("r1")).unwrap();
        store
            .set_credentials(OAuthCredentials::new("abc", "xyz"))
            .unwrap();

        remove_secrets(&store, false).unwrap();
        assert!(matches!(store.get_token(), Err(AuthError::NoToken)));
        assert!(store.credentials_exist().unwrap());

        remove_secrets(&store, true).unwrap();
        assert!(!store.credentials_exist().unwrap());

        // Nothing left to remove is still success.
        remove_secrets(&store, true).unwrap();
    }

    #[test]
    fn test_setup_redirect_defaults_to_config_port() {
        let config = Config {
            oauth_port: Some(9090),
        };
        let creds = setup_credentials(&config, "abc".into(), "xyz".into(), Some("  ".into()));
        assert_eq!(creds.client_id, "abc");
        assert_eq!(
            creds.redirect_uri(),
            Some("http://localhost:9090/callback")
        );

        let creds = setup_credentials(
            &config,
            "abc".into(),
            "xyz".into(),
            Some("http://127.0.0.1:7000/cb".into()),
        );
        assert_eq!(creds.redirect_uri(), Some("http://127.0.0.1:7000/cb"));
    }

    #[test]
    fn test_day_format() {
        let since = Some("2024-03-01T12:00:00Z".parse().unwrap());
        assert_eq!(day(&since), "2024-03-01");
        assert_eq!(day(&None), "unknown");
    }
}
