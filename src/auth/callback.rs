//! Local HTTP listener for the OAuth redirect
//!
//! Serves one route (the redirect URI's path) on `127.0.0.1`. The first
//! request that settles the flow wins; later requests still get a page but
//! their outcome is dropped.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::AuthError;

pub const DEFAULT_CALLBACK_PATH: &str = "/callback";

/// Grace period for in-flight responses before the listener is torn down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type Outcome = Result<String, AuthError>;

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

struct CallbackState {
    expected_state: String,
    slot: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl CallbackState {
    /// First writer wins.
    fn settle(&self, outcome: Outcome) {
        let sender = self.slot.lock().unwrap_or_else(|e| e.into_inner()).take();
        match sender {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!("Callback already settled, ignoring request"),
        }
    }
}

async fn handle_callback(
    State(state): State<Arc<CallbackState>>,
    Query(query): Query<CallbackQuery>,
) -> (StatusCode, Html<String>) {
    let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());

    if let Some(error) = non_empty(query.error) {
        state.settle(Err(AuthError::Authorization(error)));
        return (StatusCode::OK, Html(cancelled_page()));
    }

    if non_empty(query.state).as_deref() != Some(state.expected_state.as_str()) {
        state.settle(Err(AuthError::StateMismatch));
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page("State mismatch - please try again.")),
        );
    }

    let Some(code) = non_empty(query.code) else {
        state.settle(Err(AuthError::MissingCode));
        return (
            StatusCode::BAD_REQUEST,
            Html(error_page("Missing authorization code.")),
        );
    };

    state.settle(Ok(code));
    (StatusCode::OK, Html(success_page()))
}

/// A running callback listener. Dropping it without [`shutdown`] leaves the
/// task running until the runtime exits.
///
/// [`shutdown`]: CallbackServer::shutdown
pub struct CallbackServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    outcome: oneshot::Receiver<Outcome>,
}

impl CallbackServer {
    /// Bind `127.0.0.1:<port>` and start serving `path`.
    pub async fn bind(port: u16, path: &str, expected_state: String) -> Result<Self, AuthError> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| AuthError::Listen {
                addr: addr.to_string(),
                source: e,
            })?;
        let addr = listener.local_addr().map_err(|e| AuthError::Listen {
            addr: addr.to_string(),
            source: e,
        })?;

        let (tx, rx) = oneshot::channel();
        let state = Arc::new(CallbackState {
            expected_state,
            slot: Mutex::new(Some(tx)),
        });
        let app = Router::new()
            .route(path, get(handle_callback))
            .with_state(state);

        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let handle = tokio::spawn(async move {
            debug!("OAuth callback server listening on {}", addr);
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { stop.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!("OAuth callback server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            cancel,
            handle,
            outcome: rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the first request that settles the flow.
    pub async fn recv(&mut self) -> Outcome {
        (&mut self.outcome).await.unwrap_or(Err(AuthError::Cancelled))
    }

    /// Stop the listener. When `graceful`, in-flight responses get a short
    /// grace period before the task is aborted.
    pub async fn shutdown(mut self, graceful: bool) {
        self.cancel.cancel();
        if graceful {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.handle)
                .await
                .is_ok()
            {
                return;
            }
            debug!("Callback server did not stop within grace period");
        }
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}

/// Route path for a redirect URI: its path, or `/callback` when it has none.
pub fn callback_path(redirect: &url::Url) -> String {
    match redirect.path() {
        "" | "/" => DEFAULT_CALLBACK_PATH.to_string(),
        path => path.to_string(),
    }
}

fn page(title: &str, color: &str, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>{title}</title>
  <style>
    body {{ font-family: system-ui, sans-serif; background: #f5f5f5; margin: 0;
           display: flex; align-items: center; justify-content: center; min-height: 100vh; }}
    main {{ background: #fff; padding: 2.5rem; border-radius: 8px; text-align: center;
           box-shadow: 0 2px 10px rgba(0, 0, 0, 0.1); }}
    h1 {{ color: {color}; }}
    p {{ color: #666; }}
  </style>
</head>
<body>
  <main>
    <h1>{title}</h1>
    <p>{message}</p>
  </main>
</body>
</html>"#
    )
}

fn success_page() -> String {
    page(
        "Authorization Successful",
        "#22c55e",
        "You can close this window and return to the terminal.",
    )
}

fn cancelled_page() -> String {
    page("Authorization Cancelled", "#f59e0b", "You can close this window.")
}

fn error_page(message: &str) -> String {
    page("Authorization Error", "#ef4444", message)
}
