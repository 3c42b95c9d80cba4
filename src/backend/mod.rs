//! Storage backends for cached replies.
//!
//! Two contracts live here:
//! - [`CacheStore`]: a single-owner expiring key/value store. Writes take
//!   `&mut self`; the store itself does no locking.
//! - [`Cache`]: the shared contract the caching decorators consume. It is
//!   `Send + Sync` and is normally held as `Arc<dyn Cache>` by many
//!   concurrent pipeline runs.
//!
//! This module ships with:
//! - [`memory::ExpiringStore`]: a process-local store with per-entry TTL.
//! - [`synchronized::SynchronizedCache`]: wraps any `CacheStore` in a
//!   reader/writer lock to satisfy [`Cache`].

pub mod lock;
pub mod memory;
pub mod synchronized;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::CacheError;
use crate::message::{Message, MessageKey};

/// Expiring key/value store owned by a single writer.
pub trait CacheStore: Send + Sync + 'static {
    /// Whether a live entry exists for `key`.
    fn contains_key(&self, key: &MessageKey) -> bool;

    /// Returns the live entry for `key`.
    ///
    /// Fails with [`CacheError::MissingEntry`] when there is none; callers
    /// check [`contains_key`](Self::contains_key) first.
    fn get(&self, key: &MessageKey) -> Result<Message, CacheError>;

    /// Stores `value` under `key`, replacing any previous entry.
    ///
    /// A zero `ttl` write is still observable until the next write.
    fn set(&mut self, key: MessageKey, value: Message, ttl: Duration) -> Result<(), CacheError>;

    /// Drops the entry for `key`, if present.
    fn remove(&mut self, key: &MessageKey) -> Result<(), CacheError>;
}

/// Shared cache contract consumed by the caching decorators.
#[async_trait]
pub trait Cache: Send + Sync + 'static {
    async fn contains_key(&self, key: &MessageKey) -> Result<bool, CacheError>;

    /// Fetches the entry for `key`; absent keys are an error.
    async fn get(&self, key: &MessageKey) -> Result<Message, CacheError>;

    async fn set(&self, key: MessageKey, value: Message, ttl: Duration) -> Result<(), CacheError>;

    async fn invalidate(&self, key: &MessageKey) -> Result<(), CacheError>;
}
