use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

struct LockEntry {
    acquired_at: Instant,
    token: u64,
}

struct LockTable<K> {
    entries: HashMap<K, LockEntry>,
    next_token: u64,
}

/// Guard that releases its key when dropped
pub struct KeyLockGuard<K: Eq + Hash + Clone + Debug> {
    manager: KeyLockManager<K>,
    key: K,
    token: u64,
}

impl<K: Eq + Hash + Clone + Debug> KeyLockGuard<K> {
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K: Eq + Hash + Clone + Debug> Drop for KeyLockGuard<K> {
    fn drop(&mut self) {
        self.manager.release(&self.key, self.token);
    }
}

/// Per-key mutual exclusion: at most one holder per key, unrelated keys never block each other
pub struct KeyLockManager<K> {
    table: Arc<Mutex<LockTable<K>>>,
    lock_timeout: Duration,
}

impl<K> Clone for KeyLockManager<K> {
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
            lock_timeout: self.lock_timeout,
        }
    }
}

impl<K: Eq + Hash + Clone + Debug> KeyLockManager<K> {
    /// Locks older than `lock_timeout` are considered abandoned and may be taken over
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            table: Arc::new(Mutex::new(LockTable {
                entries: HashMap::new(),
                next_token: 0,
            })),
            lock_timeout,
        }
    }

    /// Attempts to lock `key`.
    /// Returns `Some(KeyLockGuard)` if the key was free; `None` while someone else holds it.
    pub fn try_lock(&self, key: K) -> Option<KeyLockGuard<K>> {
        let mut guard = self.table.lock();
        let table = &mut *guard;
        let now = Instant::now();
        self.evict_expired(table, now);

        let token = table.next_token;
        match table.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                debug!(
                    "🔒 {:?} is already locked (held for {:?})",
                    key,
                    now.duration_since(occupied.get().acquired_at)
                );
                None
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LockEntry { acquired_at: now, token });
                table.next_token += 1;
                debug!("🔒 Acquired lock for {:?}", key);
                Some(KeyLockGuard {
                    manager: self.clone(),
                    key,
                    token,
                })
            }
        }
    }

    // A guard whose lock expired and was taken over must not release the new holder
    fn release(&self, key: &K, token: u64) {
        let mut table = self.table.lock();
        match table.entries.get(key) {
            Some(entry) if entry.token == token => {
                table.entries.remove(key);
                debug!("🔓 Released lock for {:?}", key);
            }
            Some(_) => trace!("Lock for {:?} was taken over, not releasing", key),
            None => trace!("Attempted to release non-existent lock for {:?}", key),
        }
    }

    pub fn is_locked(&self, key: &K) -> bool {
        let mut table = self.table.lock();
        self.evict_expired(&mut table, Instant::now());
        table.entries.contains_key(key)
    }

    pub fn lock_count(&self) -> usize {
        let mut table = self.table.lock();
        self.evict_expired(&mut table, Instant::now());
        table.entries.len()
    }

    fn evict_expired(&self, table: &mut LockTable<K>, now: Instant) {
        let timeout = self.lock_timeout;
        table.entries.retain(|key, entry| {
            let held = now.duration_since(entry.acquired_at);
            let keep = held < timeout;
            if !keep {
                debug!(
                    "⚠️ Removing EXPIRED lock for {:?} (held for {:?}, timeout: {:?})",
                    key, held, timeout
                );
            }
            keep
        });
    }
}
