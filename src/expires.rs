//! The `x-expires` header descriptor.
//!
//! Replies may carry an expiry descriptor that the caching decorator uses as
//! a fallback TTL when a route has none configured. Two forms are accepted:
//!
//! * `in <seconds>`: a relative period, e.g. `in 30`
//! * `at <rfc3339>`: an absolute instant, e.g. `at 2026-10-18T12:00:00Z`
//!
//! Anything else parses to `None` and is treated as "no TTL available".

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};

use crate::message::{headers, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expires {
    /// Expires after a period counted from the moment the reply is cached.
    In(Duration),
    /// Expires at an absolute instant.
    At(DateTime<Utc>),
}

impl Expires {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let (kind, rest) = value.split_once(char::is_whitespace)?;
        let rest = rest.trim();
        match kind.to_ascii_lowercase().as_str() {
            "in" => rest.parse::<u64>().ok().map(|secs| Self::In(Duration::from_secs(secs))),
            "at" => DateTime::parse_from_rfc3339(rest)
                .ok()
                .map(|at| Self::At(at.with_timezone(&Utc))),
            _ => None,
        }
    }

    /// Reads and parses the `x-expires` header of `message`.
    pub fn from_message(message: &Message) -> Option<Self> {
        message.header(headers::EXPIRES).and_then(Self::parse)
    }

    /// Remaining time-to-live relative to `now`.
    ///
    /// An absolute expiry that already passed yields `None`.
    pub fn ttl_from(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::In(period) => Some(*period),
            Self::At(at) => {
                let remaining = *at - now;
                if remaining > TimeDelta::zero() {
                    remaining.to_std().ok()
                } else {
                    None
                }
            }
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_from(Utc::now())
    }
}

impl fmt::Display for Expires {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::In(period) => write!(f, "in {}", period.as_secs()),
            Self::At(at) => write!(f, "at {}", at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }
}
