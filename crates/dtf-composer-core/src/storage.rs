//! Narrow storage contract for artwork reads and artifact writes.
//!
//! The core talks to storage only through [`Storage`]; the worker decides
//! what backs it. Reads and writes are wrapped in a bounded retry with
//! exponential backoff, since transient storage failures are expected and
//! retryable while everything in-memory is not.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::{ComposeError, Result};

/// Blocking byte store keyed by slash-separated paths.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Vec<u8>>;
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()>;
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// Bounded retry with exponential backoff for storage operations.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Zero-delay single attempt, for tests.
    pub fn immediate() -> Self {
        Self {
            attempts: 1,
            base_delay_ms: 0,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(1 << (attempt - 1)))
    }
}

/// Storage key for a rendered base artifact.
pub fn artifact_key(tenant_id: &str, job_id: &str, base_index: u32) -> String {
    format!("tenant/{tenant_id}/outputs/{job_id}/base_{base_index}.png")
}

/// Storage key for the job manifest.
pub fn manifest_key(tenant_id: &str, job_id: &str) -> String {
    format!("tenant/{tenant_id}/outputs/{job_id}/manifest.json")
}

pub(crate) fn read_with_retry(
    store: &dyn Storage,
    key: &str,
    policy: RetryPolicy,
) -> Result<Vec<u8>> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match store.get(key) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < attempts => {
                warn!(key, attempt, error = %e, "storage read failed; retrying");
                thread::sleep(policy.delay(attempt));
            }
            Err(e) => {
                return Err(ComposeError::StorageRead {
                    key: key.to_string(),
                    attempts: attempt,
                    source: e,
                });
            }
        }
    }
}

pub(crate) fn write_with_retry(
    store: &dyn Storage,
    key: &str,
    bytes: &[u8],
    policy: RetryPolicy,
) -> Result<()> {
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match store.put(key, bytes) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                warn!(key, attempt, error = %e, "storage write failed; retrying");
                thread::sleep(policy.delay(attempt));
            }
            Err(e) => {
                return Err(ComposeError::StorageWrite {
                    key: key.to_string(),
                    attempts: attempt,
                    source: e,
                });
            }
        }
    }
}

/// Filesystem-backed storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl Storage for FsStorage {
    fn get(&self, key: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(key))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        fs::remove_file(self.path_for(key))
    }
}

/// In-memory storage for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(map) => {
                let mut keys: Vec<String> = map.keys().cloned().collect();
                keys.sort();
                keys
            }
            Err(_) => Vec::new(),
        }
    }
}

impl Storage for MemStorage {
    fn get(&self, key: &str) -> io::Result<Vec<u8>> {
        let map = self
            .entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "storage mutex poisoned"))?;
        map.get(key)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no entry for '{key}'")))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let mut map = self
            .entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "storage mutex poisoned"))?;
        map.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        let mut map = self
            .entries
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "storage mutex poisoned"))?;
        map.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn artifact_keys_follow_the_output_scheme() {
        assert_eq!(
            artifact_key("acme", "job-7", 2),
            "tenant/acme/outputs/job-7/base_2.png"
        );
        assert_eq!(
            manifest_key("acme", "job-7"),
            "tenant/acme/outputs/job-7/manifest.json"
        );
    }

    #[test]
    fn mem_storage_round_trips() {
        let store = MemStorage::new();
        store.put("a/b", b"hi").expect("put");
        assert_eq!(store.get("a/b").expect("get"), b"hi");
        store.remove("a/b").expect("remove");
        assert!(store.get("a/b").is_err());
    }

    struct FlakyStore {
        failures: AtomicU32,
        inner: MemStorage,
    }

    impl Storage for FlakyStore {
        fn get(&self, key: &str) -> io::Result<Vec<u8>> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| f.checked_sub(1))
                .is_ok()
            {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "transient"));
            }
            self.inner.get(key)
        }
        fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
            self.inner.put(key, bytes)
        }
        fn remove(&self, key: &str) -> io::Result<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn reads_retry_transient_failures() {
        let store = FlakyStore {
            failures: AtomicU32::new(2),
            inner: MemStorage::new(),
        };
        store.inner.put("k", b"v").expect("put");
        let policy = RetryPolicy {
            attempts: 3,
            base_delay_ms: 0,
        };
        assert_eq!(read_with_retry(&store, "k", policy).expect("retries"), b"v");
    }

    #[test]
    fn reads_give_up_after_the_attempt_budget() {
        let store = FlakyStore {
            failures: AtomicU32::new(10),
            inner: MemStorage::new(),
        };
        let policy = RetryPolicy {
            attempts: 3,
            base_delay_ms: 0,
        };
        let err = read_with_retry(&store, "k", policy).unwrap_err();
        assert!(matches!(err, ComposeError::StorageRead { attempts: 3, .. }));
    }
}
