//! Secret store for the persisted token and OAuth client credentials
//!
//! Wraps a [`SecretBackend`] with JSON (de)serialization and a per-instance
//! cache. Reads hit the backend at most once per entry for the lifetime of
//! the store; writes through the same instance refresh the cache. Changes
//! made by other processes are not observed.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::backend::{self, BackendError, SecretBackend};
use super::{AuthEnv, AuthError, OAuthCredentials, Token};

const TOKEN_KEY: &str = "token";
const CREDENTIALS_KEY: &str = "oauth_credentials";

/// Substrings the macOS keychain reports when it is locked.
const KEYCHAIN_LOCKED_MESSAGES: &[&str] = &[
    "keychain is locked",
    "The user name or passphrase you entered is not correct",
];

/// Cached view of one backend entry.
#[derive(Debug, Clone)]
enum Cached<T> {
    Unloaded,
    Present(T),
    Absent,
}

pub struct SecretStore {
    backend: Box<dyn SecretBackend>,
    token: Mutex<Cached<Token>>,
    credentials: Mutex<Cached<OAuthCredentials>>,
}

impl SecretStore {
    /// Open the backend selected by the environment.
    pub fn open(env: &AuthEnv, keyring_dir: &Path) -> Result<Self, AuthError> {
        Ok(Self::with_backend(backend::open(env, keyring_dir)?))
    }

    /// [`open`](Self::open) on the blocking pool. Opening may wait on the
    /// keychain timeout or a vault password prompt.
    pub async fn open_async(env: &AuthEnv, keyring_dir: &Path) -> Result<Self, AuthError> {
        let env = env.clone();
        let keyring_dir = keyring_dir.to_path_buf();
        tokio::task::spawn_blocking(move || Self::open(&env, &keyring_dir))
            .await
            .map_err(|e| AuthError::Storage {
                op: "open keyring",
                message: e.to_string(),
            })?
    }

    pub fn with_backend(backend: Box<dyn SecretBackend>) -> Self {
        Self {
            backend,
            token: Mutex::new(Cached::Unloaded),
            credentials: Mutex::new(Cached::Unloaded),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Persist `tok`, stamping `created_at` when unset.
    pub fn set_token(&self, mut tok: Token) -> Result<(), AuthError> {
        if tok.created_at.is_none() {
            tok.created_at = Some(Utc::now());
        }
        self.write(TOKEN_KEY, &tok, "store token")?;
        *lock(&self.token) = Cached::Present(tok);
        Ok(())
    }

    pub fn get_token(&self) -> Result<Token, AuthError> {
        self.read(&self.token, TOKEN_KEY, "token", AuthError::NoToken)
    }

    pub fn delete_token(&self) -> Result<(), AuthError> {
        self.remove(TOKEN_KEY, "delete token")?;
        *lock(&self.token) = Cached::Absent;
        Ok(())
    }

    /// Persist OAuth client credentials. Blank id or secret is rejected
    /// before anything is written.
    pub fn set_credentials(&self, creds: OAuthCredentials) -> Result<(), AuthError> {
        creds.validate()?;
        self.write(CREDENTIALS_KEY, &creds, "store credentials")?;
        *lock(&self.credentials) = Cached::Present(creds);
        Ok(())
    }

    pub fn get_credentials(&self) -> Result<OAuthCredentials, AuthError> {
        self.read(
            &self.credentials,
            CREDENTIALS_KEY,
            "credentials",
            AuthError::NoCredentials,
        )
    }

    pub fn delete_credentials(&self) -> Result<(), AuthError> {
        self.remove(CREDENTIALS_KEY, "delete credentials")?;
        *lock(&self.credentials) = Cached::Absent;
        Ok(())
    }

    /// Whether credentials are configured; absence is `false`, not an error.
    pub fn credentials_exist(&self) -> Result<bool, AuthError> {
        match self.get_credentials() {
            Ok(_) => Ok(true),
            Err(AuthError::NoCredentials) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read<T>(
        &self,
        slot: &Mutex<Cached<T>>,
        key: &str,
        what: &'static str,
        missing: AuthError,
    ) -> Result<T, AuthError>
    where
        T: Clone + DeserializeOwned,
    {
        let mut cached = lock(slot);
        match &*cached {
            Cached::Present(value) => return Ok(value.clone()),
            Cached::Absent => return Err(missing),
            Cached::Unloaded => {}
        }

        let data = match self.backend.get(key) {
            Ok(data) => data,
            Err(BackendError::NotFound) => {
                debug!("No {} entry in {} keyring", what, self.backend.name());
                *cached = Cached::Absent;
                return Err(missing);
            }
            Err(BackendError::Other(message)) => {
                return Err(AuthError::Storage {
                    op: read_op(what),
                    message,
                })
            }
        };

        let value: T =
            serde_json::from_slice(&data).map_err(|e| AuthError::Decode { what, source: e })?;
        *cached = Cached::Present(value.clone());
        Ok(value)
    }

    fn write<T: Serialize>(&self, key: &str, value: &T, op: &'static str) -> Result<(), AuthError> {
        let payload = serde_json::to_vec(value).map_err(|e| AuthError::Decode {
            what: "payload",
            source: e,
        })?;
        self.backend
            .set(key, &payload)
            .map_err(|e| wrap_keychain_error(op, e))
    }

    fn remove(&self, key: &str, op: &'static str) -> Result<(), AuthError> {
        match self.backend.remove(key) {
            Ok(()) | Err(BackendError::NotFound) => Ok(()),
            Err(BackendError::Other(message)) => Err(AuthError::Storage { op, message }),
        }
    }
}

fn read_op(what: &'static str) -> &'static str {
    match what {
        "token" => "read token",
        _ => "read credentials",
    }
}

fn lock<T>(slot: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Attach unlock instructions when the backend reports a locked keychain.
fn wrap_keychain_error(op: &'static str, err: BackendError) -> AuthError {
    let message = err.to_string();
    if is_keychain_locked_error(&message) {
        AuthError::KeychainLocked { op, message }
    } else {
        AuthError::Storage { op, message }
    }
}

pub fn is_keychain_locked_error(msg: &str) -> bool {
    KEYCHAIN_LOCKED_MESSAGES.iter().any(|needle| msg.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::backend::memory::MemoryBackend;

    fn store() -> (SecretStore, MemoryBackend) {
        let backend = MemoryBackend::new();
        (SecretStore::with_backend(Box::new(backend.clone())), backend)
    }

    #[tokio::test]
    async fn test_open_async_uses_file_vault() {
        let dir = tempfile::tempdir().unwrap();
        let env = AuthEnv {
            keyring_backend: "file".into(),
            keyring_password: Some("hunter2".into()),
            ..AuthEnv::default()
        };
        let store = SecretStore::open_async(&env, dir.path()).await.unwrap();
        assert_eq!(store.backend_name(), "file");
        store.set_token(Token::test("t1")).unwrap();

        let reopened = SecretStore::open_async(&env, dir.path()).await.unwrap();
        assert_eq!(reopened.get_token().unwrap().test_token(), Some("t1"));
    }

    #[test]
    fn test_set_then_get_token_stamps_created_at() {
        let (store, _) = store();
        store.set_token(Token::refresh("r1")).unwrap();

        let tok = store.get_token().unwrap();
        assert_eq!(tok.refresh_token(), Some("r1"));
        assert!(tok.created_at.is_some());
    }

    #[test]
    fn test_set_token_keeps_existing_created_at() {
        let (store, _) = store();
        let created = "2024-03-01T12:00:00Z".parse().unwrap();
        let tok = Token {
            created_at: Some(created),
            ..Token::test("t1")
        };
        store.set_token(tok.clone()).unwrap();
        assert_eq!(store.get_token().unwrap(), tok);
    }

    #[test]
    fn test_empty_store_returns_not_found_sentinels() {
        let (store, _) = store();
        assert!(matches!(store.get_token(), Err(AuthError::NoToken)));
        assert!(matches!(store.get_credentials(), Err(AuthError::NoCredentials)));
        assert!(!store.credentials_exist().unwrap());
    }

    #[test]
    fn test_reads_are_cached() {
        let (store, backend) = store();
        backend.insert_raw(TOKEN_KEY, br#"{"refresh_token":"r1"}"#);

        store.get_token().unwrap();
        store.get_token().unwrap();
        assert_eq!(backend.reads(), 1);

        // External changes are not observed by this instance.
        backend.insert_raw(TOKEN_KEY, br#"{"refresh_token":"r9"}"#);
        assert_eq!(store.get_token().unwrap().refresh_token(), Some("r1"));
    }

    #[test]
    fn test_absence_is_cached() {
        let (store, backend) = store();
        assert!(store.get_credentials().is_err());
        assert!(!store.credentials_exist().unwrap());
        assert_eq!(backend.reads(), 1);
    }

    #[test]
    fn test_credentials_round_trip_scenario() {
        let (store, _) = store();
        store
            .set_credentials(OAuthCredentials::new("abc", "xyz"))
            .unwrap();
        assert!(store.credentials_exist().unwrap());

        let creds = store.get_credentials().unwrap();
        assert_eq!(creds.client_id, "abc");
        assert_eq!(creds.client_secret, "xyz");
    }

    #[test]
    fn test_invalid_credentials_are_not_written() {
        let (store, backend) = store();
        for creds in [
            OAuthCredentials::new("", "xyz"),
            OAuthCredentials::new("abc", ""),
            OAuthCredentials::new("   ", "xyz"),
            OAuthCredentials::new("abc", " \t "),
        ] {
            assert!(matches!(
                store.set_credentials(creds),
                Err(AuthError::InvalidCredentials(_))
            ));
        }
        assert_eq!(backend.writes(), 0);
        assert!(!store.credentials_exist().unwrap());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (store, _) = store();
        store.delete_token().unwrap();
        store.set_token(Token::test("t1")).unwrap();
        store.delete_token().unwrap();
        store.delete_token().unwrap();
        assert!(matches!(store.get_token(), Err(AuthError::NoToken)));

        store.delete_credentials().unwrap();
    }

    #[test]
    fn test_write_failure_is_storage_error() {
        let (store, backend) = store();
        backend.fail_writes();
        match store.set_token(Token::test("t1")) {
            Err(AuthError::Storage { op, .. }) => assert_eq!(op, "store token"),
            other => panic!("expected storage error, got {:?}", other),
        }
        // A failed write leaves the cache untouched.
        assert!(matches!(store.get_token(), Err(AuthError::NoToken)));
    }

    #[test]
    fn test_corrupt_entry_is_decode_error() {
        let (store, backend) = store();
        backend.insert_raw(CREDENTIALS_KEY, b"not json");
        assert!(matches!(
            store.get_credentials(),
            Err(AuthError::Decode { what: "credentials", .. })
        ));
    }

    #[test]
    fn test_locked_keychain_detection() {
        assert!(is_keychain_locked_error(
            "store token: keychain is locked (-25308)"
        ));
        assert!(is_keychain_locked_error(
            "The user name or passphrase you entered is not correct."
        ));
        assert!(!is_keychain_locked_error("permission denied"));

        let err = wrap_keychain_error(
            "store token",
            BackendError::Other("User interaction is not allowed: keychain is locked".into()),
        );
        assert!(matches!(err, AuthError::KeychainLocked { .. }));
        assert!(err.to_string().contains("security unlock-keychain"));
    }
}
