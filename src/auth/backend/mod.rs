//! Secret store backends
//!
//! The platform keychain (macOS Keychain, Windows Credential Manager, Secret
//! Service on Linux) or an encrypted file vault, selected from the
//! environment. On Linux without a session bus the keychain cannot work, so
//! the file vault is forced unless a backend was chosen explicitly.

pub mod keychain;
#[cfg(test)]
pub mod memory;
pub mod vault;

use std::path::Path;
use std::str::FromStr;
use std::sync::mpsc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{AuthEnv, AuthError};
pub use keychain::KeychainBackend;
pub use vault::{FileVault, PasswordSource};

/// Service name under which entries are stored.
pub const SERVICE_NAME: &str = "raindrop-cli";

/// Upper bound on opening the platform keychain over D-Bus.
pub const KEYRING_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors reported by a backend. `NotFound` is expected and is converted to
/// a sentinel by the store; everything else becomes a storage error.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("entry not found")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

/// Key/value secret storage.
pub trait SecretBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Vec<u8>, BackendError>;
    fn set(&self, key: &str, data: &[u8]) -> Result<(), BackendError>;
    fn remove(&self, key: &str) -> Result<(), BackendError>;
    fn name(&self) -> &'static str;
}

/// Value of `RAINDROP_KEYRING_BACKEND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Auto,
    Keychain,
    File,
}

impl FromStr for BackendKind {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(BackendKind::Auto),
            "keychain" => Ok(BackendKind::Keychain),
            "file" => Ok(BackendKind::File),
            other => Err(AuthError::InvalidBackend(other.to_string())),
        }
    }
}

/// Headless Linux session with no explicit choice: only the file vault works.
fn should_force_file(os: &str, kind: BackendKind, dbus_session: Option<&str>) -> bool {
    os == "linux" && kind == BackendKind::Auto && dbus_session.is_none()
}

/// A session bus exists but the Secret Service behind it may never answer.
fn should_use_timeout(os: &str, kind: BackendKind, dbus_session: Option<&str>) -> bool {
    os == "linux" && kind == BackendKind::Auto && dbus_session.is_some()
}

/// Open the backend selected by `env`.
pub fn open(env: &AuthEnv, keyring_dir: &Path) -> Result<Box<dyn SecretBackend>, AuthError> {
    let kind: BackendKind = env.keyring_backend.parse()?;
    let os = std::env::consts::OS;
    let dbus = env.dbus_session.as_deref();

    if kind == BackendKind::File || should_force_file(os, kind, dbus) {
        debug!("Using file keyring in {}", keyring_dir.display());
        return open_vault(env, keyring_dir);
    }

    let opened = if should_use_timeout(os, kind, dbus) {
        open_with_timeout(|| KeychainBackend::open(SERVICE_NAME), KEYRING_OPEN_TIMEOUT)
    } else {
        KeychainBackend::open(SERVICE_NAME)
    };

    match opened {
        Ok(backend) => {
            debug!("Using platform keychain");
            Ok(Box::new(backend))
        }
        Err(err @ AuthError::KeyringTimeout { .. }) => Err(err),
        Err(err) if kind == BackendKind::Auto => {
            warn!("Platform keychain unavailable ({}), using file keyring", err);
            open_vault(env, keyring_dir)
        }
        Err(err) => Err(err),
    }
}

fn open_vault(env: &AuthEnv, keyring_dir: &Path) -> Result<Box<dyn SecretBackend>, AuthError> {
    let password = PasswordSource::resolve(env.keyring_password.clone())?;
    Ok(Box::new(FileVault::open(keyring_dir, password)?))
}

/// Run `open` on its own thread and give up after `timeout`.
///
/// On timeout the thread is abandoned, not killed; whatever it eventually
/// does is not undone.
fn open_with_timeout<T, F>(open: F, timeout: Duration) -> Result<T, AuthError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AuthError> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    std::thread::spawn(move || {
        let _ = tx.send(open());
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(AuthError::KeyringTimeout { after: timeout }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(AuthError::Storage {
            op: "open keyring",
            message: "keyring open thread exited without a result".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_kind() {
        assert_eq!("".parse::<BackendKind>().unwrap(), BackendKind::Auto);
        assert_eq!(" AUTO ".parse::<BackendKind>().unwrap(), BackendKind::Auto);
        assert_eq!("keychain".parse::<BackendKind>().unwrap(), BackendKind::Keychain);
        assert_eq!("File".parse::<BackendKind>().unwrap(), BackendKind::File);
        assert!(matches!(
            "kwallet".parse::<BackendKind>(),
            Err(AuthError::InvalidBackend(name)) if name == "kwallet"
        ));
    }

    #[test]
    fn test_headless_linux_forces_file() {
        assert!(should_force_file("linux", BackendKind::Auto, None));
        assert!(!should_force_file("linux", BackendKind::Auto, Some("unix:path=/run/bus")));
        assert!(!should_force_file("linux", BackendKind::Keychain, None));
        assert!(!should_force_file("macos", BackendKind::Auto, None));
    }

    #[test]
    fn test_timeout_only_with_session_bus() {
        assert!(should_use_timeout("linux", BackendKind::Auto, Some("unix:path=/run/bus")));
        assert!(!should_use_timeout("linux", BackendKind::Auto, None));
        assert!(!should_use_timeout("linux", BackendKind::Keychain, Some("unix:path=/run/bus")));
        assert!(!should_use_timeout("windows", BackendKind::Auto, Some("x")));
    }

    #[test]
    fn test_open_with_timeout_returns_result() {
        let value = open_with_timeout(|| Ok(7u32), Duration::from_secs(1)).unwrap();
        assert_eq!(value, 7);

        let err = open_with_timeout::<u32, _>(|| Err(AuthError::NoTty), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, AuthError::NoTty));
    }

    #[test]
    fn test_open_with_timeout_abandons_slow_open() {
        let started = std::time::Instant::now();
        let err = open_with_timeout(
            || {
                std::thread::sleep(Duration::from_secs(2));
                Ok(())
            },
            Duration::from_millis(50),
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::KeyringTimeout { after } if after == Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_file_backend_without_password_or_tty_fails() {
        // cargo test runs without a TTY on stdin in CI; skip when interactive.
        if std::io::IsTerminal::is_terminal(&std::io::stdin()) {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let env = AuthEnv {
            keyring_backend: "file".into(),
            ..AuthEnv::default()
        };
        assert!(matches!(open(&env, dir.path()), Err(AuthError::NoTty)));
    }

    #[test]
    fn test_file_backend_with_password() {
        let dir = tempfile::tempdir().unwrap();
        let env = AuthEnv {
            keyring_backend: "file".into(),
            keyring_password: Some("hunter2".into()),
            ..AuthEnv::default()
        };
        let backend = open(&env, dir.path()).unwrap();
        assert_eq!(backend.name(), "file");
    }
}
