//! Correlation ids for request/reply matching.
//!
//! Every [`MessageExchange`](crate::exchange::MessageExchange) carries a
//! `CorrelationId` so logs, cache events and reply timeouts can be tied back
//! to the request that produced them. Ids travel on the wire in the
//! `x-correlation-id` header.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::message::{headers, Message};

/// Unique identifier for one request/reply exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generates a new random correlation id using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Uses the message's `x-correlation-id` header, or generates a new id.
    pub fn from_message(message: &Message) -> Self {
        message
            .header(headers::CORRELATION_ID)
            .map(|value| Self(value.to_owned()))
            .unwrap_or_else(Self::new)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}
