//! In-memory storage backend with one cancellable expiry timer per entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{Storage, StorageError};

struct Entry {
    value: Vec<u8>,
    expire_at: Option<Instant>,
    timer: Option<CancellationToken>,
}

impl Entry {
    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.expire_at = None;
    }

    fn is_expired(&self) -> bool {
        self.expire_at.is_some_and(|at| Instant::now() >= at)
    }
}

type EntryMap = Arc<Mutex<HashMap<String, Entry>>>;

/// Lock-protected map of entries; expiry deletes the entry and shrinks the
/// live size. Timers need a running tokio runtime.
pub struct MemoryStorage {
    inner: EntryMap,
}

impl MemoryStorage {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn set(&self, key: &str, value: &[u8], ttl: i32) -> Result<(), StorageError> {
        let mut map = self.inner.lock();
        if ttl < 0 {
            if let Some(mut entry) = map.remove(key) {
                entry.stop_timer();
            }
            return Ok(());
        }
        if let Some(prev) = map.get_mut(key) {
            // The old timer must not reap the new value.
            prev.stop_timer();
        }
        let mut entry = Entry {
            value: value.to_vec(),
            expire_at: None,
            timer: None,
        };
        if ttl > 0 {
            arm(&mut entry, key, ttl, &self.inner);
        }
        let _ = map.insert(key.to_owned(), entry);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let mut map = self.inner.lock();
        let expired = match map.get(key) {
            None => return Err(StorageError::NotFound),
            Some(entry) => entry.is_expired(),
        };
        if expired {
            if let Some(mut entry) = map.remove(key) {
                entry.stop_timer();
            }
            return Err(StorageError::NotFound);
        }
        map.get(key)
            .map(|entry| entry.value.clone())
            .ok_or(StorageError::NotFound)
    }

    fn ttl(&self, key: &str, ttl: i32) -> Result<(), StorageError> {
        let mut map = self.inner.lock();
        let expired = match map.get(key) {
            None => {
                return if ttl < 0 {
                    Ok(())
                } else {
                    Err(StorageError::NotFound)
                };
            }
            Some(entry) => entry.is_expired(),
        };
        if ttl < 0 || expired {
            if let Some(mut entry) = map.remove(key) {
                entry.stop_timer();
            }
            return if ttl < 0 {
                Ok(())
            } else {
                Err(StorageError::NotFound)
            };
        }
        if let Some(entry) = map.get_mut(key) {
            entry.stop_timer();
            if ttl > 0 {
                arm(entry, key, ttl, &self.inner);
            }
        }
        Ok(())
    }

    fn remove_all(&self) {
        let mut map = self.inner.lock();
        for (_, mut entry) in map.drain() {
            entry.stop_timer();
        }
    }

    fn size(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Schedule expiry for `entry`. The spawned timer re-checks the deadline
/// under the lock before reaping, so a replaced entry is never deleted by a
/// stale timer.
fn arm(entry: &mut Entry, key: &str, ttl: i32, inner: &EntryMap) {
    let window = Duration::from_secs(u64::from(ttl.unsigned_abs()));
    entry.expire_at = Some(Instant::now() + window);
    let token = CancellationToken::new();
    entry.timer = Some(token.clone());

    let key = key.to_owned();
    let inner = Arc::clone(inner);
    let _ = tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {}
            () = tokio::time::sleep(window) => {
                let mut map = inner.lock();
                if map.get(&key).is_some_and(Entry::is_expired) {
                    let _ = map.remove(&key);
                }
            }
        }
    });
}
