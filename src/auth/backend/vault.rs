//! Encrypted file backend
//!
//! One file per key in the keyring directory. Each file is a small JSON
//! envelope around an AES-256-GCM ciphertext whose key is derived from the
//! vault password with Argon2id. Salt and nonce are fresh on every write.

use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{BackendError, SecretBackend};
use crate::auth::AuthError;

const VERSION: u8 = 1;
const KDF: &str = "argon2id";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Where the vault password comes from.
#[derive(Debug, Clone)]
pub enum PasswordSource {
    Fixed(String),
    /// Ask on the terminal the first time the vault is touched.
    Prompt,
}

impl PasswordSource {
    /// Prefer the environment, then an interactive prompt. Non-interactive
    /// sessions without a password cannot use the vault at all.
    pub fn resolve(env_password: Option<String>) -> Result<Self, AuthError> {
        if let Some(password) = env_password {
            return Ok(PasswordSource::Fixed(password));
        }
        if std::io::stdin().is_terminal() {
            return Ok(PasswordSource::Prompt);
        }
        Err(AuthError::NoTty)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u8,
    kdf: String,
    salt: String,
    nonce: String,
    ciphertext: String,
}

pub struct FileVault {
    dir: PathBuf,
    source: PasswordSource,
    prompted: Mutex<Option<String>>,
}

impl FileVault {
    pub fn open(dir: &Path, source: PasswordSource) -> Result<Self, AuthError> {
        fs::create_dir_all(dir).map_err(|e| AuthError::Io {
            op: "create keyring directory",
            source: e,
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|e| {
                AuthError::Io {
                    op: "set keyring directory permissions",
                    source: e,
                }
            })?;
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            source,
            prompted: Mutex::new(None),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.vault", key))
    }

    fn password(&self) -> Result<String, BackendError> {
        match &self.source {
            PasswordSource::Fixed(password) => Ok(password.clone()),
            PasswordSource::Prompt => {
                let mut guard = self.prompted.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(password) = guard.as_ref() {
                    return Ok(password.clone());
                }
                let password = rpassword::prompt_password("Keyring password: ")
                    .map_err(|e| BackendError::Other(format!("read keyring password: {}", e)))?;
                *guard = Some(password.clone());
                Ok(password)
            }
        }
    }
}

impl SecretBackend for FileVault {
    fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        let path = self.path_for(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackendError::NotFound)
            }
            Err(e) => {
                return Err(BackendError::Other(format!(
                    "read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        decrypt(&content, &self.password()?)
    }

    fn set(&self, key: &str, data: &[u8]) -> Result<(), BackendError> {
        let payload = encrypt(data, &self.password()?)?;
        let path = self.path_for(key);
        let temp_path = path.with_extension("vault.tmp");

        fs::write(&temp_path, payload)
            .map_err(|e| BackendError::Other(format!("write {}: {}", temp_path.display(), e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp_path, fs::Permissions::from_mode(0o600))
                .map_err(|e| BackendError::Other(format!("set permissions: {}", e)))?;
        }

        fs::rename(&temp_path, &path)
            .map_err(|e| BackendError::Other(format!("write {}: {}", path.display(), e)))
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BackendError::NotFound),
            Err(e) => Err(BackendError::Other(format!(
                "remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

fn encrypt(plaintext: &[u8], password: &str) -> Result<String, BackendError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut salt)
        .and_then(|_| getrandom::getrandom(&mut nonce))
        .map_err(|e| BackendError::Other(format!("generate nonce: {}", e)))?;

    let key = derive_key(password, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| BackendError::Other(format!("cipher key: {}", e)))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| BackendError::Other(format!("encryption failed: {}", e)))?;

    let envelope = Envelope {
        version: VERSION,
        kdf: KDF.to_string(),
        salt: STANDARD_NO_PAD.encode(salt),
        nonce: STANDARD_NO_PAD.encode(nonce),
        ciphertext: STANDARD_NO_PAD.encode(ciphertext),
    };
    serde_json::to_string_pretty(&envelope)
        .map_err(|e| BackendError::Other(format!("encode vault entry: {}", e)))
}

fn decrypt(payload: &str, password: &str) -> Result<Vec<u8>, BackendError> {
    let envelope: Envelope = serde_json::from_str(payload)
        .map_err(|e| BackendError::Other(format!("decode vault entry: {}", e)))?;
    if envelope.version != VERSION || envelope.kdf != KDF {
        return Err(BackendError::Other(format!(
            "unsupported vault entry (version {}, kdf {})",
            envelope.version, envelope.kdf
        )));
    }

    let decode = |field: &str, value: &str| {
        STANDARD_NO_PAD
            .decode(value)
            .map_err(|e| BackendError::Other(format!("invalid {} encoding: {}", field, e)))
    };
    let salt = decode("salt", &envelope.salt)?;
    let nonce = decode("nonce", &envelope.nonce)?;
    let ciphertext = decode("ciphertext", &envelope.ciphertext)?;
    if nonce.len() != NONCE_LEN {
        return Err(BackendError::Other("invalid nonce length".into()));
    }

    let key = derive_key(password, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| BackendError::Other(format!("cipher key: {}", e)))?;
    cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|_| BackendError::Other("decryption failed (wrong keyring password?)".into()))
}

fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32], BackendError> {
    let params = argon2::Params::new(19456, 2, 1, Some(32))
        .map_err(|e| BackendError::Other(format!("argon2 parameters: {}", e)))?;
    let argon2 = argon2::Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| BackendError::Other(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault(dir: &Path, password: &str) -> FileVault {
        FileVault::open(dir, PasswordSource::Fixed(password.into())).unwrap()
    }

    #[test]
    fn test_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(dir.path(), "hunter2");
        v.set("token", br#"{"refresh_token":"r1"}"#).unwrap();
        assert_eq!(v.get("token").unwrap(), br#"{"refresh_token":"r1"}"#);
    }

    #[test]
    fn test_entry_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(dir.path(), "hunter2");
        v.set("token", b"super-secret-refresh").unwrap();
        let on_disk = fs::read_to_string(dir.path().join("token.vault")).unwrap();
        assert!(!on_disk.contains("super-secret-refresh"));
        assert!(on_disk.contains("argon2id"));
    }

    #[cfg(unix)]
    #[test]
    fn test_entry_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        vault(dir.path(), "pw").set("token", b"x").unwrap();
        let mode = fs::metadata(dir.path().join("token.vault"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_missing_entry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(dir.path(), "pw");
        assert!(matches!(v.get("token"), Err(BackendError::NotFound)));
        assert!(matches!(v.remove("token"), Err(BackendError::NotFound)));
    }

    #[test]
    fn test_wrong_password_fails() {
        let dir = tempfile::tempdir().unwrap();
        vault(dir.path(), "right").set("token", b"x").unwrap();
        match vault(dir.path(), "wrong").get("token") {
            Err(BackendError::Other(msg)) => assert!(msg.contains("wrong keyring password")),
            other => panic!("expected decryption failure, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_deletes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let v = vault(dir.path(), "pw");
        v.set("oauth_credentials", b"{}").unwrap();
        v.remove("oauth_credentials").unwrap();
        assert!(matches!(v.get("oauth_credentials"), Err(BackendError::NotFound)));
    }
}
