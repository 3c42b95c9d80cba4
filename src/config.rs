//! Per-route cache configuration.
//!
//! Routes are identified by message [`Label`]. Each route may carry a
//! [`CacheConfiguration`]; caching is *active* for a route only when the
//! configuration is enabled, has a TTL, and is bound to a shared [`Cache`].
//! Missing configuration is never an error: the route simply runs uncached.
//!
//! Route tables can be loaded from any serde format as [`CacheSettings`] and
//! bound to a cache afterwards:
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use message_pipeline::backend::synchronized::SynchronizedCache;
//! use message_pipeline::config::{CacheConfigurations, CacheSettings};
//!
//! let routes: HashMap<String, CacheSettings> = serde_json::from_str(
//!     r#"{ "quotes.get": { "enabled": true, "ttl_ms": 30000 } }"#,
//! ).unwrap();
//!
//! let configurations = CacheConfigurations::from_settings(
//!     routes,
//!     Arc::new(SynchronizedCache::in_memory()),
//! );
//! assert!(configurations.active(&"quotes.get".into()).is_some());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::Cache;
use crate::message::Label;

/// Serializable route settings, not yet bound to a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default)]
    pub enabled: Option<bool>,
    /// Entry time-to-live in milliseconds.
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl CacheSettings {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_ms.map(Duration::from_millis)
    }
}

/// Cache configuration of one route.
#[derive(Clone, Default)]
pub struct CacheConfiguration {
    enabled: Option<bool>,
    ttl: Option<Duration>,
    cache: Option<Arc<dyn Cache>>,
}

impl fmt::Debug for CacheConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfiguration")
            .field("enabled", &self.enabled)
            .field("ttl", &self.ttl)
            .field("cache", &self.cache.as_ref().map(|_| "<cache>"))
            .finish()
    }
}

impl CacheConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enabled configuration with `ttl`, bound to `cache`.
    pub fn enabled(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            enabled: Some(true),
            ttl: Some(ttl),
            cache: Some(cache),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn from_settings(settings: CacheSettings, cache: Arc<dyn Cache>) -> Self {
        Self {
            enabled: settings.enabled,
            ttl: settings.ttl(),
            cache: Some(cache),
        }
    }

    pub fn is_enabled(&self) -> Option<bool> {
        self.enabled
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    /// Caching applies only when enabled, a TTL is set and a cache is bound.
    pub fn is_active(&self) -> bool {
        self.enabled == Some(true) && self.ttl.is_some() && self.cache.is_some()
    }

    /// Returns the bound cache and TTL when the configuration is active.
    pub fn active(&self) -> Option<(&Arc<dyn Cache>, Duration)> {
        if self.enabled != Some(true) {
            return None;
        }
        Some((self.cache.as_ref()?, self.ttl?))
    }
}

/// Mapping from route label to [`CacheConfiguration`].
#[derive(Clone, Debug, Default)]
pub struct CacheConfigurations {
    routes: HashMap<Label, CacheConfiguration>,
}

impl CacheConfigurations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> CacheConfigurationsBuilder {
        CacheConfigurationsBuilder::default()
    }

    /// Binds every route in `settings` to the shared `cache`.
    pub fn from_settings<I, L>(settings: I, cache: Arc<dyn Cache>) -> Self
    where
        I: IntoIterator<Item = (L, CacheSettings)>,
        L: Into<Label>,
    {
        let routes = settings
            .into_iter()
            .map(|(label, settings)| {
                (
                    label.into(),
                    CacheConfiguration::from_settings(settings, cache.clone()),
                )
            })
            .collect();
        Self { routes }
    }

    pub fn insert(&mut self, label: impl Into<Label>, configuration: CacheConfiguration) {
        self.routes.insert(label.into(), configuration);
    }

    pub fn get(&self, label: &Label) -> Option<&CacheConfiguration> {
        self.routes.get(label)
    }

    /// The active configuration for `label`, if any.
    pub fn active(&self, label: &Label) -> Option<(&Arc<dyn Cache>, Duration)> {
        self.routes.get(label).and_then(CacheConfiguration::active)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Builder for [`CacheConfigurations`].
#[derive(Default)]
pub struct CacheConfigurationsBuilder {
    routes: HashMap<Label, CacheConfiguration>,
}

impl CacheConfigurationsBuilder {
    /// Adds an arbitrary configuration for `label`.
    pub fn route(mut self, label: impl Into<Label>, configuration: CacheConfiguration) -> Self {
        self.routes.insert(label.into(), configuration);
        self
    }

    /// Enables caching on `label` with `ttl` in `cache`.
    pub fn cached(self, label: impl Into<Label>, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        self.route(label, CacheConfiguration::enabled(cache, ttl))
    }

    pub fn build(self) -> CacheConfigurations {
        CacheConfigurations {
            routes: self.routes,
        }
    }
}
