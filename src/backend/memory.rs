use moka::sync::Cache as MokaCache;
use std::fmt;
use std::time::{Duration, Instant};

use super::CacheStore;
use crate::error::CacheError;
use crate::message::{Message, MessageKey};

/// An in-memory [`CacheStore`] with per-entry time-to-live.
///
/// Entries live in a [`moka`] cache. Expiry is tracked per entry and checked
/// lazily on every read; [`purge_expired`](Self::purge_expired) sweeps dead
/// entries. With a capacity set, moka evicts entries once the store is full.
///
/// A zero-TTL write stays visible until the next write to the store, so
/// callers can always read back the value they just stored.
pub struct ExpiringStore {
    entries: MokaCache<MessageKey, StoredEntry>,
    max_capacity: Option<u64>,
    pinned: Option<MessageKey>,
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Message,
    expiry: Expiry,
}

#[derive(Debug, Clone, Copy)]
enum Expiry {
    At(Instant),
    UntilNextWrite,
    Never,
}

impl StoredEntry {
    fn is_live(&self, now: Instant) -> bool {
        match self.expiry {
            Expiry::At(at) => now < at,
            Expiry::UntilNextWrite | Expiry::Never => true,
        }
    }
}

impl Expiry {
    fn after(ttl: Duration) -> Self {
        // A TTL past the end of `Instant` never expires.
        Instant::now()
            .checked_add(ttl)
            .map_or(Expiry::Never, Expiry::At)
    }
}

impl Default for ExpiringStore {
    fn default() -> Self {
        Self {
            entries: MokaCache::builder().build(),
            max_capacity: None,
            pinned: None,
        }
    }
}

impl fmt::Debug for ExpiringStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiringStore")
            .field("entries", &self.entries.entry_count())
            .field("max_capacity", &self.max_capacity)
            .field("pinned", &self.pinned)
            .finish()
    }
}

impl ExpiringStore {
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding at most `max_capacity` entries.
    pub fn with_capacity(max_capacity: usize) -> Self {
        let max_capacity = u64::try_from(max_capacity.max(1)).unwrap_or(u64::MAX);
        Self {
            entries: MokaCache::builder().max_capacity(max_capacity).build(),
            max_capacity: Some(max_capacity),
            pinned: None,
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        usize::try_from(self.entries.entry_count()).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every expired entry. Returns how many were dropped.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let dead: Vec<MessageKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| *key)
            .collect();

        for key in &dead {
            self.entries.invalidate(key);
        }
        self.entries.run_pending_tasks();
        dead.len()
    }

    fn live(&self, key: &MessageKey) -> Option<StoredEntry> {
        let entry = self.entries.get(key)?;
        if entry.is_live(Instant::now()) {
            Some(entry)
        } else {
            None
        }
    }

    fn release_pinned(&mut self) {
        if let Some(key) = self.pinned.take() {
            if let Some(entry) = self.entries.get(&key) {
                if matches!(entry.expiry, Expiry::UntilNextWrite) {
                    self.entries.invalidate(&key);
                }
            }
        }
    }
}

impl CacheStore for ExpiringStore {
    fn contains_key(&self, key: &MessageKey) -> bool {
        self.live(key).is_some()
    }

    fn get(&self, key: &MessageKey) -> Result<Message, CacheError> {
        self.live(key)
            .map(|entry| entry.value)
            .ok_or(CacheError::MissingEntry(*key))
    }

    fn set(&mut self, key: MessageKey, value: Message, ttl: Duration) -> Result<(), CacheError> {
        self.release_pinned();

        let expiry = if ttl.is_zero() {
            self.pinned = Some(key);
            Expiry::UntilNextWrite
        } else {
            Expiry::after(ttl)
        };

        self.entries.insert(key, StoredEntry { value, expiry });
        Ok(())
    }

    fn remove(&mut self, key: &MessageKey) -> Result<(), CacheError> {
        self.entries.invalidate(key);
        if self.pinned.as_ref() == Some(key) {
            self.pinned = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn request(payload: &'static str) -> Message {
        Message::new("quotes.get", payload)
    }

    #[test]
    fn set_and_get_returns_cached_entry() {
        let mut store = ExpiringStore::new();
        let key = request("AAPL").key();

        store
            .set(key, Message::reply("187"), Duration::from_secs(1))
            .expect("set succeeds");

        assert!(store.contains_key(&key));
        let cached = store.get(&key).expect("entry present");
        assert_eq!(cached, Message::reply("187"));
    }

    #[test]
    fn get_on_absent_key_is_an_error() {
        let store = ExpiringStore::new();
        let key = request("AAPL").key();
        assert!(matches!(
            store.get(&key),
            Err(CacheError::MissingEntry(missing)) if missing == key
        ));
    }

    #[test]
    fn entry_disappears_after_ttl() {
        let mut store = ExpiringStore::new();
        let key = request("AAPL").key();

        store
            .set(key, Message::reply("187"), Duration::from_millis(20))
            .expect("set succeeds");
        assert!(store.contains_key(&key));

        sleep(Duration::from_millis(40));
        assert!(!store.contains_key(&key), "entry expired");
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn zero_ttl_write_is_visible_until_next_write() {
        let mut store = ExpiringStore::new();
        let first = request("AAPL").key();
        let second = request("MSFT").key();

        store
            .set(first, Message::reply("187"), Duration::ZERO)
            .expect("set succeeds");
        sleep(Duration::from_millis(5));
        assert!(store.contains_key(&first), "last write stays observable");

        store
            .set(second, Message::reply("402"), Duration::from_secs(5))
            .expect("set succeeds");
        assert!(!store.contains_key(&first), "released by the next write");
        assert!(store.contains_key(&second));
    }

    #[test]
    fn unbounded_ttl_never_expires() {
        let mut store = ExpiringStore::new();
        let key = request("AAPL").key();

        store
            .set(key, Message::reply("187"), Duration::MAX)
            .expect("set succeeds");
        store
            .set(request("MSFT").key(), Message::reply("402"), Duration::from_secs(5))
            .expect("set succeeds");

        assert_eq!(store.get(&key).expect("present"), Message::reply("187"));
        assert_eq!(store.purge_expired(), 0);
    }

    #[test]
    fn overwrite_replaces_value() {
        let mut store = ExpiringStore::new();
        let key = request("AAPL").key();

        store
            .set(key, Message::reply("1"), Duration::from_secs(5))
            .expect("set succeeds");
        store
            .set(key, Message::reply("2"), Duration::from_secs(5))
            .expect("set succeeds");

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key).expect("present"), Message::reply("2"));
    }

    #[test]
    fn bounded_store_stays_within_capacity() {
        let mut store = ExpiringStore::with_capacity(2);
        let symbols = ["A", "B", "C", "D", "E", "F", "G", "H"];

        for symbol in symbols {
            store
                .set(request(symbol).key(), Message::reply(symbol), Duration::from_secs(60))
                .expect("set succeeds");
        }

        assert!(store.len() <= 2, "store holds {} entries", store.len());
    }

    #[test]
    fn remove_drops_entry() {
        let mut store = ExpiringStore::new();
        let key = request("AAPL").key();
        store
            .set(key, Message::reply("1"), Duration::ZERO)
            .expect("set succeeds");
        store.remove(&key).expect("remove succeeds");
        assert!(!store.contains_key(&key));
    }
}
