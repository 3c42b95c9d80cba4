use async_trait::async_trait;
use std::sync::RwLock;
use std::time::Duration;

use super::lock::{rw_read, rw_write};
use super::memory::ExpiringStore;
use super::{Cache, CacheStore};
use crate::error::CacheError;
use crate::message::{Message, MessageKey};

const SOURCE: &str = "backend::synchronized";

/// Thread-safe [`Cache`] over any [`CacheStore`].
///
/// Reads (`contains_key`, `get`) share a read lock and run concurrently;
/// writes (`set`, `invalidate`) take the write lock exclusively. Each guard
/// lives only for the duration of the store call, so the lock is released on
/// every exit path, including unwinding out of a panicking store.
#[derive(Debug, Default)]
pub struct SynchronizedCache<S = ExpiringStore> {
    store: RwLock<S>,
}

impl<S> SynchronizedCache<S>
where
    S: CacheStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store: RwLock::new(store),
        }
    }

    /// Runs `f` with shared access to the underlying store.
    pub fn read<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let guard = rw_read(&self.store, SOURCE, "read");
        f(&guard)
    }

    /// Runs `f` with exclusive access to the underlying store.
    pub fn write<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        let mut guard = rw_write(&self.store, SOURCE, "write");
        f(&mut guard)
    }
}

impl SynchronizedCache<ExpiringStore> {
    /// Shared cache over an unbounded [`ExpiringStore`].
    pub fn in_memory() -> Self {
        Self::new(ExpiringStore::new())
    }

    /// Shared cache over an [`ExpiringStore`] bounded to `max_capacity` entries.
    pub fn in_memory_bounded(max_capacity: usize) -> Self {
        Self::new(ExpiringStore::with_capacity(max_capacity))
    }

    pub fn purge_expired(&self) -> usize {
        self.write(ExpiringStore::purge_expired)
    }
}

#[async_trait]
impl<S> Cache for SynchronizedCache<S>
where
    S: CacheStore,
{
    async fn contains_key(&self, key: &MessageKey) -> Result<bool, CacheError> {
        Ok(rw_read(&self.store, SOURCE, "contains_key").contains_key(key))
    }

    async fn get(&self, key: &MessageKey) -> Result<Message, CacheError> {
        rw_read(&self.store, SOURCE, "get").get(key)
    }

    async fn set(&self, key: MessageKey, value: Message, ttl: Duration) -> Result<(), CacheError> {
        rw_write(&self.store, SOURCE, "set").set(key, value, ttl)
    }

    async fn invalidate(&self, key: &MessageKey) -> Result<(), CacheError> {
        rw_write(&self.store, SOURCE, "invalidate").remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(payload: &'static str) -> MessageKey {
        Message::new("quotes.get", payload).key()
    }

    #[tokio::test]
    async fn reads_back_written_value() {
        let cache = SynchronizedCache::in_memory();
        cache
            .set(key("AAPL"), Message::reply("187"), Duration::from_secs(5))
            .await
            .expect("set succeeds");

        assert!(cache.contains_key(&key("AAPL")).await.expect("read succeeds"));
        assert_eq!(
            cache.get(&key("AAPL")).await.expect("entry present"),
            Message::reply("187")
        );
    }

    #[tokio::test]
    async fn second_writer_does_not_deadlock() {
        let cache = SynchronizedCache::in_memory();
        for round in 0..3u64 {
            cache
                .set(
                    key("AAPL"),
                    Message::reply(round.to_string()),
                    Duration::from_secs(5),
                )
                .await
                .expect("set succeeds");
        }
        assert_eq!(
            cache.get(&key("AAPL")).await.expect("entry present"),
            Message::reply("2")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_and_readers_see_whole_values() {
        let cache = Arc::new(SynchronizedCache::in_memory());
        let target = key("shared");
        cache
            .set(target, Message::reply("v-0"), Duration::from_secs(5))
            .await
            .expect("seed succeeds");

        let mut handles = Vec::new();
        for writer in 0..8u32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for round in 0..50u32 {
                    let value = format!("v-{}", writer * 1000 + round);
                    cache
                        .set(target, Message::reply(value), Duration::from_secs(5))
                        .await
                        .expect("set succeeds");
                }
            }));
        }
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let value = cache.get(&target).await.expect("entry present");
                    let text = std::str::from_utf8(value.payload().as_bytes())
                        .expect("utf-8 payload")
                        .to_owned();
                    assert!(text.starts_with("v-"), "torn value: {text}");
                }
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn writers_on_other_keys_never_disturb_readers() {
        let cache = Arc::new(SynchronizedCache::in_memory());
        let watched = key("Z");
        cache
            .set(watched, Message::reply("z-seed"), Duration::from_secs(60))
            .await
            .expect("seed succeeds");

        let mut handles = Vec::new();
        for symbol in ["A", "B", "C", "D", "E", "F", "G", "H"] {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for round in 0..50u32 {
                    cache
                        .set(
                            key(symbol),
                            Message::reply(format!("{symbol}-{round}")),
                            Duration::from_secs(60),
                        )
                        .await
                        .expect("set succeeds");
                }
            }));
        }
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    assert!(cache.contains_key(&watched).await.expect("read succeeds"));
                    let value = cache.get(&watched).await.expect("entry present");
                    assert_eq!(value, Message::reply("z-seed"));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.expect("task completes");
        }
    }

    #[tokio::test]
    async fn unbounded_ttl_leaves_lock_usable() {
        let cache = SynchronizedCache::in_memory();
        cache
            .set(key("AAPL"), Message::reply("187"), Duration::MAX)
            .await
            .expect("set succeeds");
        cache
            .set(key("MSFT"), Message::reply("402"), Duration::from_secs(5))
            .await
            .expect("lock still usable");

        assert_eq!(
            cache.get(&key("AAPL")).await.expect("entry present"),
            Message::reply("187")
        );
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let cache = Arc::new(SynchronizedCache::in_memory());
        let poisoner = cache.clone();
        let _ = std::thread::spawn(move || {
            poisoner.write(|_store| panic!("poison the lock"));
        })
        .join();

        let count = cache.read(|store| store.len());
        assert_eq!(count, 0);
        cache.write(|store| {
            store
                .set(key("AAPL"), Message::reply("1"), Duration::from_secs(1))
                .expect("set succeeds")
        });
        assert!(cache.read(|store| store.contains_key(&key("AAPL"))));
    }
}
