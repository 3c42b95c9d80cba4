//! Structured cache event logging.
//!
//! Cache decisions made by the decorators are emitted as JSON documents on the
//! `message_pipeline::cache` tracing target so they can be shipped and
//! analysed offline. Logging is off by default and can be sampled.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, SystemTime};

use crate::correlation::CorrelationId;
use crate::message::{Label, MessageKey};

/// Configuration for structured cache event logging.
#[derive(Debug, Clone)]
pub struct CacheLoggingConfig {
    /// Emit cache events
    pub enabled: bool,

    /// Sample rate (1.0 = every event, 0.1 = 10%)
    pub sample_rate: f64,
}

impl Default for CacheLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: 1.0,
        }
    }
}

impl CacheLoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the sample rate, clamped to `0.0..=1.0`.
    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Checks if this event should be logged based on the sampling rate.
    pub fn should_sample(&self) -> bool {
        if !self.enabled {
            return false;
        }
        if self.sample_rate >= 1.0 {
            return true;
        }
        use std::collections::hash_map::RandomState;
        use std::hash::BuildHasher;
        let hasher = RandomState::new();

        let random = (hasher.hash_one(SystemTime::now()) as f64) / (u64::MAX as f64);
        random < self.sample_rate
    }
}

/// Which side of the bus made the cache decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSide {
    /// The outgoing request pipeline.
    Send,
    /// The consumer answering incoming requests.
    Receive,
}

/// Types of cache events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheEventType {
    Hit,
    Miss,
    Store,
    /// Caching skipped for the exchange
    Bypass,
}

/// A single cache decision.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub timestamp: SystemTime,
    pub event_type: CacheEventType,
    pub side: CacheSide,
    pub correlation_id: Option<CorrelationId>,
    pub label: Label,
    pub key: Option<MessageKey>,
    pub ttl_ms: Option<u64>,
    pub size_bytes: Option<usize>,
}

impl CacheEvent {
    pub fn new(event_type: CacheEventType, side: CacheSide, label: Label) -> Self {
        Self {
            timestamp: SystemTime::now(),
            event_type,
            side,
            correlation_id: None,
            label,
            key: None,
            ttl_ms: None,
            size_bytes: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_key(mut self, key: MessageKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = Some(millis(ttl));
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size_bytes = Some(size);
        self
    }

    /// Renders the event as a JSON document.
    pub fn to_json(&self) -> serde_json::Value {
        let timestamp =
            DateTime::<Utc>::from(self.timestamp).to_rfc3339_opts(SecondsFormat::Millis, true);

        json!({
            "timestamp": timestamp,
            "event": self.event_type,
            "side": self.side,
            "correlation_id": self.correlation_id.as_ref().map(CorrelationId::as_str),
            "label": self.label.as_str(),
            "key": self.key.map(|key| key.to_string()),
            "ttl_ms": self.ttl_ms,
            "size_bytes": self.size_bytes,
        })
    }

    /// Logs this event if `config` samples it.
    pub fn log(&self, config: &CacheLoggingConfig) {
        if !config.should_sample() {
            return;
        }

        tracing::info!(
            target: "message_pipeline::cache",
            event = %self.to_json()
        );
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn logging_config_default() {
        let config = CacheLoggingConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.sample_rate, 1.0);
    }

    #[test]
    fn sample_rate_clamped() {
        let config = CacheLoggingConfig::new().with_sample_rate(1.5);
        assert_eq!(config.sample_rate, 1.0);

        let config = CacheLoggingConfig::new().with_sample_rate(-0.5);
        assert_eq!(config.sample_rate, 0.0);
    }

    #[test]
    fn should_sample_respects_enabled_flag() {
        assert!(!CacheLoggingConfig::new().should_sample());
        assert!(CacheLoggingConfig::new().with_enabled(true).should_sample());
        assert!(!CacheLoggingConfig::new()
            .with_enabled(true)
            .with_sample_rate(0.0)
            .should_sample());
    }

    #[test]
    fn millis_saturates_on_huge_durations() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);

        let event = CacheEvent::new(CacheEventType::Store, CacheSide::Send, "quotes.get".into())
            .with_ttl(Duration::MAX);
        assert_eq!(event.to_json()["ttl_ms"], u64::MAX);
    }

    #[test]
    fn event_renders_json() {
        let request = Message::new("quotes.get", "AAPL");
        let event = CacheEvent::new(CacheEventType::Store, CacheSide::Send, "quotes.get".into())
            .with_correlation_id(CorrelationId::from("c-1"))
            .with_key(request.key())
            .with_ttl(Duration::from_millis(1500))
            .with_size(3);

        let rendered = event.to_json();
        assert_eq!(rendered["event"], "store");
        assert_eq!(rendered["side"], "send");
        assert_eq!(rendered["correlation_id"], "c-1");
        assert_eq!(rendered["label"], "quotes.get");
        assert_eq!(rendered["key"], request.key().to_string());
        assert_eq!(rendered["ttl_ms"], 1500);
        assert_eq!(rendered["size_bytes"], 3);
    }

    #[test]
    fn log_does_not_panic_when_enabled() {
        let config = CacheLoggingConfig::new().with_enabled(true);
        CacheEvent::new(CacheEventType::Hit, CacheSide::Receive, Label::empty()).log(&config);
    }
}
