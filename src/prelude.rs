//! Re-exports for consumers who prefer a single import.
//!
//! ```
//! use std::sync::Arc;
//! use message_pipeline::prelude::*;
//! # use std::time::Duration;
//! let cache: Arc<dyn Cache> = Arc::new(SynchronizedCache::in_memory());
//! let routes = CacheConfigurations::builder()
//!     .cached("quotes.get", cache, Duration::from_secs(30))
//!     .build();
//! assert_eq!(routes.len(), 1);
//! ```

pub use crate::backend::memory::ExpiringStore;
pub use crate::backend::synchronized::SynchronizedCache;
pub use crate::backend::{Cache, CacheStore};
pub use crate::caching::CachingFilterDecorator;
pub use crate::config::{CacheConfiguration, CacheConfigurations, CacheSettings};
pub use crate::consumer::{
    CachingConsumer, Consumer, DeliveryContext, FrameId, ReplyCapture, ReplyChannel,
};
pub use crate::correlation::CorrelationId;
pub use crate::error::{BoxError, CacheError, PipelineError};
pub use crate::exchange::{MessageExchange, ReplyType};
pub use crate::expires::Expires;
pub use crate::filter::sending::SendingFilter;
pub use crate::filter::timeout::ReplyTimeoutFilter;
pub use crate::filter::{
    DecoratorRegistry, Filter, FilterChain, FilterChainBuilder, FilterDecorator, FilterInvoker,
    FilterKind,
};
pub use crate::logging::{CacheEvent, CacheEventType, CacheLoggingConfig, CacheSide};
pub use crate::message::{headers, Label, Message, MessageKey, Payload};
pub use crate::scheduler::{SchedulerConfig, Ticket, TicketScheduler};
pub use crate::stats::{CacheStats, StatsSnapshot};
