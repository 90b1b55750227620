//! Platform keychain backend

use tracing::instrument;

use super::{BackendError, SecretBackend};
use crate::auth::AuthError;

/// Entries live in the OS credential store under one service name, one
/// entry per key, with the payload stored as the entry's password.
#[derive(Debug, Clone)]
pub struct KeychainBackend {
    service: String,
}

impl KeychainBackend {
    /// Probe the platform store so that an unreachable keychain fails here
    /// rather than on first use.
    pub fn open(service: &str) -> Result<Self, AuthError> {
        let backend = Self {
            service: service.to_string(),
        };
        match backend.entry("probe")?.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(backend),
            Err(e) => Err(AuthError::Storage {
                op: "open keyring",
                message: e.to_string(),
            }),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, AuthError> {
        keyring::Entry::new(&self.service, key).map_err(|e| AuthError::Storage {
            op: "open keyring entry",
            message: e.to_string(),
        })
    }

    fn backend_entry(&self, key: &str) -> Result<keyring::Entry, BackendError> {
        keyring::Entry::new(&self.service, key).map_err(map_error)
    }
}

impl SecretBackend for KeychainBackend {
    #[instrument(skip(self))]
    fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        let password = self.backend_entry(key)?.get_password().map_err(map_error)?;
        Ok(password.into_bytes())
    }

    #[instrument(skip(self, data))]
    fn set(&self, key: &str, data: &[u8]) -> Result<(), BackendError> {
        let password = std::str::from_utf8(data)
            .map_err(|e| BackendError::Other(format!("payload is not UTF-8: {}", e)))?;
        self.backend_entry(key)?
            .set_password(password)
            .map_err(map_error)
    }

    #[instrument(skip(self))]
    fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.backend_entry(key)?
            .delete_credential()
            .map_err(map_error)
    }

    fn name(&self) -> &'static str {
        "keychain"
    }
}

fn map_error(err: keyring::Error) -> BackendError {
    match err {
        keyring::Error::NoEntry => BackendError::NotFound,
        other => BackendError::Other(other.to_string()),
    }
}
