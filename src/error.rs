use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

use crate::correlation::CorrelationId;
use crate::message::MessageKey;

/// Boxed error type used at collaborator boundaries (transports, consumers,
/// scheduled callbacks).
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors that can occur while interacting with a cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("backend error: {0}")]
    Backend(String),

    /// `get` was called for a key the store does not hold. Callers are
    /// expected to check `contains_key` first.
    #[error("no cached entry for key {0}")]
    MissingEntry(MessageKey),
}

/// Errors surfaced from a pipeline run.
///
/// Filters, decorators and consumers propagate these unchanged; the pipeline
/// never retries or translates them.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("filter error: {0}")]
    Filter(#[source] BoxError),

    #[error("consumer error: {0}")]
    Consumer(#[source] BoxError),

    #[error("no reply for request {correlation_id} within {timeout:?}")]
    ReplyTimeout {
        correlation_id: CorrelationId,
        timeout: Duration,
    },

    #[error("context cannot reply: {0}")]
    CannotReply(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl PipelineError {
    /// Wraps an arbitrary error raised by a filter implementation.
    pub fn filter<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Filter(err.into())
    }

    /// Wraps an arbitrary error raised by the transport collaborator.
    pub fn transport<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Transport(err.into())
    }
}
