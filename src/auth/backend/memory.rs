//! In-memory backend for tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::{BackendError, SecretBackend};

#[derive(Default)]
struct Inner {
    entries: RwLock<HashMap<String, Vec<u8>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

/// Clones share the same entries and counters, so a test can keep a handle
/// after moving one into a store.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent `set` fail.
    pub fn fail_writes(&self) {
        self.inner.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Write behind the store's back, bypassing counters.
    pub fn insert_raw(&self, key: &str, data: &[u8]) {
        self.inner
            .entries
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), data.to_vec());
    }

    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.inner
            .entries
            .read()
            .expect("lock poisoned")
            .get(key)
            .cloned()
    }
}

impl SecretBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        self.raw(key).ok_or(BackendError::NotFound)
    }

    fn set(&self, key: &str, data: &[u8]) -> Result<(), BackendError> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(BackendError::Other("write refused".into()));
        }
        self.insert_raw(key, data);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.inner
            .entries
            .write()
            .expect("lock poisoned")
            .remove(key)
            .map(|_| ())
            .ok_or(BackendError::NotFound)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
