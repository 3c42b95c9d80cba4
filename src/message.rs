//! Message model shared by the filter chain, the caches and the consumers.
//!
//! A [`Message`] is an immutable value made of a routing [`Label`], an opaque
//! [`Payload`] and a string header map. Caches never key on message identity:
//! [`Message::key`] derives a [`MessageKey`] from the label and the payload
//! bytes, so two structurally identical requests land in the same slot.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Reserved header names understood by the pipeline.
pub mod headers {
    /// Expiry descriptor on replies (`in <seconds>` or `at <rfc3339>`).
    pub const EXPIRES: &str = "x-expires";
    /// Message time-to-live in milliseconds.
    pub const TTL: &str = "x-ttl";
    pub const CONTENT_TYPE: &str = "content-type";
    /// Route the reply should be sent to.
    pub const REPLY_ROUTE: &str = "x-reply-route";
    /// Per-request reply timeout in milliseconds.
    pub const TIMEOUT: &str = "x-timeout";
    pub const CORRELATION_ID: &str = "x-correlation-id";
}

/// Opaque routing/type identifier of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

impl Label {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// The cleared label carried by replies rebuilt from a cache.
    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Label {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Label {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Serialized message body. The pipeline never looks inside it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Payload(Bytes);

impl Payload {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    /// Serializes `value` as JSON.
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_vec(value).map(|bytes| Self(Bytes::from(bytes)))
    }

    /// Deserializes the payload from JSON.
    pub fn decode_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Self(value)
    }
}

impl From<&'static str> for Payload {
    fn from(value: &'static str) -> Self {
        Self(Bytes::from_static(value.as_bytes()))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self(Bytes::from(value))
    }
}

/// Structural cache key of a message: SHA-256 over label and payload.
///
/// Headers never contribute to the key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageKey([u8; 32]);

impl MessageKey {
    pub fn derive(label: &Label, payload: &Payload) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(label.as_str().as_bytes());
        // Separator keeps ("ab", "c") and ("a", "bc") apart.
        hasher.update([0u8]);
        hasher.update(payload.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageKey({self})")
    }
}

/// Immutable message value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    label: Label,
    payload: Payload,
    headers: BTreeMap<String, String>,
}

impl Message {
    pub fn new(label: impl Into<Label>, payload: impl Into<Payload>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Builds a reply carrying `payload` with an empty label.
    pub fn reply(payload: impl Into<Payload>) -> Self {
        Self::new(Label::empty(), payload)
    }

    /// Returns a copy with `name` set to `value`.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Returns a copy carrying `label` instead of the current one.
    pub fn with_label(mut self, label: impl Into<Label>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Cache key derived from label and payload.
    pub fn key(&self) -> MessageKey {
        MessageKey::derive(&self.label, &self.payload)
    }
}
