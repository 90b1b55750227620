//! OAuth2 authorization-code flow
//!
//! Either opens the browser and catches the redirect on a local listener,
//! or prints the authorize URL and reads the redirect URL back from stdin.
//! Both modes end with an `authorization_code` exchange and hand the
//! refresh token back to the caller, who persists it.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, CsrfToken, RedirectUrl};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::callback::{self, CallbackServer};
use super::{AuthError, OAuthCredentials, TokenExchange};

pub const AUTH_URL: &str = "https://raindrop.io/oauth/authorize";
pub const DEFAULT_CALLBACK_PORT: u16 = 8484;
pub const DEFAULT_AUTHORIZE_TIMEOUT: Duration = Duration::from_secs(180);

pub fn default_redirect_uri(port: u16) -> String {
    format!("http://localhost:{}/callback", port)
}

/// The credentials' redirect URI when set, else the local default.
pub fn resolve_redirect_uri(creds: &OAuthCredentials, port: u16) -> String {
    creds
        .redirect_uri()
        .map(|uri| uri.trim().to_string())
        .unwrap_or_else(|| default_redirect_uri(port))
}

#[derive(Debug, Clone)]
pub struct AuthorizeOptions {
    /// Paste the redirect URL instead of running the local listener.
    pub manual: bool,
    /// Overall deadline for the flow, including the code exchange.
    pub timeout: Duration,
    /// Callback port used when the credentials carry no redirect URI.
    pub port: u16,
}

impl Default for AuthorizeOptions {
    fn default() -> Self {
        Self {
            manual: false,
            timeout: DEFAULT_AUTHORIZE_TIMEOUT,
            port: DEFAULT_CALLBACK_PORT,
        }
    }
}

type BrowserOpener = Arc<dyn Fn(&str) -> io::Result<()> + Send + Sync>;

pub struct AuthorizationFlow {
    exchange: TokenExchange,
    auth_url: String,
    open_browser: BrowserOpener,
}

impl AuthorizationFlow {
    pub fn new(exchange: TokenExchange) -> Self {
        Self {
            exchange,
            auth_url: AUTH_URL.to_string(),
            open_browser: Arc::new(|url: &str| open::that(url)),
        }
    }

    #[cfg(test)]
    pub fn with_browser(
        mut self,
        open_browser: impl Fn(&str) -> io::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.open_browser = Arc::new(open_browser);
        self
    }

    /// Authorize URL with `response_type=code`, `client_id`, `redirect_uri`,
    /// `state` and `access_type=offline`.
    pub fn authorize_url(
        &self,
        creds: &OAuthCredentials,
        redirect_uri: &str,
        state: &str,
    ) -> Result<String, AuthError> {
        let auth_url = AuthUrl::new(self.auth_url.clone()).map_err(|e| AuthError::InvalidUrl {
            what: "authorize url",
            source: e,
        })?;
        let redirect =
            RedirectUrl::new(redirect_uri.to_string()).map_err(|e| AuthError::InvalidUrl {
                what: "redirect uri",
                source: e,
            })?;

        let client = BasicClient::new(ClientId::new(creds.client_id.clone()), None, auth_url, None)
            .set_redirect_uri(redirect);
        let (url, _) = client
            .authorize_url(|| CsrfToken::new(state.to_string()))
            .add_extra_param("access_type", "offline")
            .url();
        Ok(url.to_string())
    }

    /// Run the flow and return the refresh token.
    ///
    /// Fails with [`AuthError::DeadlineExceeded`] when `opts.timeout`
    /// elapses and with [`AuthError::Cancelled`] when `cancel` fires.
    pub async fn authorize(
        &self,
        creds: &OAuthCredentials,
        opts: &AuthorizeOptions,
        cancel: CancellationToken,
    ) -> Result<String, AuthError> {
        let state = random_state()?;
        self.authorize_with_state(creds, opts, &cancel, &state, tokio::io::stdin())
            .await
    }

    async fn authorize_with_state<R>(
        &self,
        creds: &OAuthCredentials,
        opts: &AuthorizeOptions,
        cancel: &CancellationToken,
        state: &str,
        input: R,
    ) -> Result<String, AuthError>
    where
        R: AsyncRead + Unpin,
    {
        creds.validate()?;
        let redirect_uri = resolve_redirect_uri(creds, opts.port);
        let auth_url = self.authorize_url(creds, &redirect_uri, state)?;

        let deadline = tokio::time::sleep(opts.timeout);
        tokio::pin!(deadline);
        let mut bounds = Bounds {
            deadline,
            timeout: opts.timeout,
            cancel,
        };

        if opts.manual {
            self.authorize_manual(creds, &redirect_uri, &auth_url, state, input, &mut bounds)
                .await
        } else {
            self.authorize_with_server(creds, &redirect_uri, &auth_url, state, &mut bounds)
                .await
        }
    }

    async fn authorize_manual<R>(
        &self,
        creds: &OAuthCredentials,
        redirect_uri: &str,
        auth_url: &str,
        state: &str,
        input: R,
        bounds: &mut Bounds<'_, '_>,
    ) -> Result<String, AuthError>
    where
        R: AsyncRead + Unpin,
    {
        eprintln!("Visit this URL to authorize:");
        eprintln!("{}", auth_url);
        eprintln!();
        eprintln!("After authorizing, you'll be redirected to a URL.");
        eprintln!("Copy the URL from your browser and paste it here.");
        eprintln!();
        eprint!("Paste redirect URL: ");

        let line = bounds.run(read_line(input)).await?;
        let (code, got_state) = extract_code_and_state(line.trim())?;
        match got_state {
            Some(got) if got != state => return Err(AuthError::StateMismatch),
            Some(_) => {}
            None => warn!("Redirect URL has no state parameter; skipping state check"),
        }

        bounds.run(self.finish(creds, redirect_uri, &code)).await
    }

    async fn authorize_with_server(
        &self,
        creds: &OAuthCredentials,
        redirect_uri: &str,
        auth_url: &str,
        state: &str,
        bounds: &mut Bounds<'_, '_>,
    ) -> Result<String, AuthError> {
        let redirect = Url::parse(redirect_uri).map_err(|e| AuthError::InvalidUrl {
            what: "redirect uri",
            source: e,
        })?;
        let port = redirect.port().unwrap_or(DEFAULT_CALLBACK_PORT);
        let path = callback::callback_path(&redirect);

        let mut server = CallbackServer::bind(port, &path, state.to_string()).await?;
        debug!("Waiting for redirect on http://{}{}", server.local_addr(), path);

        eprintln!("Opening browser for authorization...");
        eprintln!("If the browser doesn't open, visit:");
        eprintln!("{}", auth_url);
        if let Err(e) = (self.open_browser)(auth_url) {
            warn!("Failed to open browser: {}", e);
        }

        let code = match bounds.run(server.recv()).await {
            Ok(code) => code,
            Err(e) => {
                server.shutdown(false).await;
                return Err(e);
            }
        };

        eprintln!("Authorization received. Finishing...");
        let result = bounds.run(self.finish(creds, redirect_uri, &code)).await;
        server.shutdown(result.is_ok()).await;
        result
    }

    async fn finish(
        &self,
        creds: &OAuthCredentials,
        redirect_uri: &str,
        code: &str,
    ) -> Result<String, AuthError> {
        debug!("Exchanging authorization code");
        let tok = self.exchange.exchange_code(creds, redirect_uri, code).await?;
        tok.refresh_token.ok_or(AuthError::NoRefreshToken)
    }
}

/// Deadline and cancellation shared by every step of one flow.
struct Bounds<'a, 'c> {
    deadline: Pin<&'a mut Sleep>,
    timeout: Duration,
    cancel: &'c CancellationToken,
}

impl Bounds<'_, '_> {
    async fn run<T>(
        &mut self,
        step: impl Future<Output = Result<T, AuthError>>,
    ) -> Result<T, AuthError> {
        let timeout = self.timeout;
        tokio::select! {
            result = step => result,
            _ = self.deadline.as_mut() => Err(AuthError::DeadlineExceeded(timeout)),
            _ = self.cancel.cancelled() => Err(AuthError::Cancelled),
        }
    }
}

/// 32 random bytes, base64url without padding.
pub fn random_state() -> Result<String, AuthError> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).map_err(AuthError::Random)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Pull `code` and, if present, `state` out of a pasted redirect URL.
pub fn extract_code_and_state(raw: &str) -> Result<(String, Option<String>), AuthError> {
    let url = Url::parse(raw).map_err(|e| AuthError::InvalidUrl {
        what: "redirect url",
        source: e,
    })?;
    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
    };
    let code = param("code").ok_or(AuthError::MissingCode)?;
    Ok((code, param("state")))
}

async fn read_line<R: AsyncRead + Unpin>(input: R) -> Result<String, AuthError> {
    let mut line = String::new();
    let read = BufReader::new(input)
        .read_line(&mut line)
        .await
        .map_err(|e| AuthError::Io {
            op: "read redirect url",
            source: e,
        })?;
    if read == 0 {
        return Err(AuthError::Io {
            op: "read redirect url",
            source: io::ErrorKind::UnexpectedEof.into(),
        });
    }
    Ok(line)
}
