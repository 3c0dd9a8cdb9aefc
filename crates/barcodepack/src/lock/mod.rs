//! Non-blocking single-flight locks with a lease.
//!
//! A holder that dies without releasing loses the lock once the lease
//! expires; releases are checked against the holder's token so a late
//! release never frees someone else's lease.

use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use uuid::Uuid;

use crate::error::StorageError;
use crate::storage::ensure_directory;

pub trait FinalizeLock: Send + Sync {
    /// Takes the lock for `key` if it is free or its lease has expired.
    ///
    /// Returns the holder token, or `None` when someone else holds it.
    fn try_acquire(&self, key: &str, lease: Duration) -> Result<Option<String>, StorageError>;

    /// Releases the lock if `token` still holds it.
    fn release(&self, key: &str, token: &str) -> Result<bool, StorageError>;
}

/// Holds a lease until dropped.
pub struct LeaseGuard {
    lock: Arc<dyn FinalizeLock>,
    key: String,
    token: String,
}

impl LeaseGuard {
    /// Tries to take `key`, returning a guard that releases it on drop.
    pub fn try_acquire(
        lock: Arc<dyn FinalizeLock>,
        key: &str,
        lease: Duration,
    ) -> Result<Option<Self>, StorageError> {
        Ok(lock.try_acquire(key, lease)?.map(|token| Self {
            lock,
            key: key.to_string(),
            token,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        match self.lock.release(&self.key, &self.token) {
            Ok(true) => log::debug!("Released lock '{}'", self.key),
            Ok(false) => log::warn!("Lock '{}' was taken over before release", self.key),
            Err(e) => log::error!("Failed to release lock '{}': {}", self.key, e),
        }
    }
}

/// In-process lease lock.
#[derive(Default)]
pub struct MemoryLeaseLock {
    held: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryLeaseLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FinalizeLock for MemoryLeaseLock {
    fn try_acquire(&self, key: &str, lease: Duration) -> Result<Option<String>, StorageError> {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        if let Some((_, expires)) = held.get(key) {
            if *expires > now {
                return Ok(None);
            }
            log::warn!("Lease on '{}' expired, taking over", key);
        }
        let token = Uuid::new_v4().to_string();
        held.insert(key.to_string(), (token.clone(), now + lease));
        Ok(Some(token))
    }

    fn release(&self, key: &str, token: &str) -> Result<bool, StorageError> {
        let mut held = self.held.lock().unwrap_or_else(|p| p.into_inner());
        match held.get(key) {
            Some((holder, _)) if holder == token => {
                held.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Lease lock shared between processes through lock files.
///
/// Each key maps to `<dir>/<key>.lock` created with `O_CREAT | O_EXCL`; the
/// file's modification time starts the lease.
pub struct FileLeaseLock {
    dir: PathBuf,
}

impl FileLeaseLock {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        ensure_directory(&dir)?;
        Ok(Self { dir })
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.lock", name))
    }

    fn create(path: &Path, token: &str) -> Result<bool, StorageError> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(mut file) => {
                file.write_all(token.as_bytes())
                    .map_err(|e| StorageError::WriteFile {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StorageError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    fn is_expired(path: &Path, lease: Duration) -> bool {
        std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > lease)
    }
}

impl FinalizeLock for FileLeaseLock {
    fn try_acquire(&self, key: &str, lease: Duration) -> Result<Option<String>, StorageError> {
        let path = self.lock_path(key);
        let token = Uuid::new_v4().to_string();

        if Self::create(&path, &token)? {
            return Ok(Some(token));
        }
        if !Self::is_expired(&path, lease) {
            return Ok(None);
        }

        log::warn!("Lease file {} expired, taking over", path.display());
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Remove { path, source: e }),
        }
        // Another contender may win the re-create.
        Ok(Self::create(&path, &token)?.then_some(token))
    }

    fn release(&self, key: &str, token: &str) -> Result<bool, StorageError> {
        let path = self.lock_path(key);
        let holder = match std::fs::read_to_string(&path) {
            Ok(holder) => holder,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(StorageError::Read { path, source: e }),
        };
        if holder != token {
            return Ok(false);
        }
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Remove { path, source: e }),
        }
    }
}
