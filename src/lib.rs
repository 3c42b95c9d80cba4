//! Message Pipeline
//! ================
//!
//! `message-pipeline` is the core of a message bus client: an asynchronous
//! filter chain that every outgoing exchange passes through, reply caching
//! on both the send and the receive side, and a ticket scheduler for
//! deferred callbacks such as reply timeouts.
//!
//! Filters run in reverse registration order, so the transport-facing
//! [`SendingFilter`] is registered first. Caching is attached as a decorator
//! keyed by [`FilterKind`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use message_pipeline::prelude::*;
//!
//! # async fn run() -> Result<(), PipelineError> {
//! let cache: Arc<dyn Cache> = Arc::new(SynchronizedCache::in_memory());
//! let routes = CacheConfigurations::builder()
//!     .cached("quotes.get", cache, Duration::from_secs(30))
//!     .build();
//!
//! let scheduler = Arc::new(TicketScheduler::start(SchedulerConfig::default())?);
//!
//! let chain = FilterChain::builder()
//!     .filter(SendingFilter::from_fn(|mut exchange: MessageExchange| async move {
//!         exchange.set_incoming(Message::reply("187.20"));
//!         Ok::<_, std::convert::Infallible>(exchange)
//!     }))
//!     .filter(ReplyTimeoutFilter::new(scheduler, Duration::from_secs(5)))
//!     .decorate(FilterKind::SEND, CachingFilterDecorator::new(Arc::new(routes)))
//!     .build();
//!
//! let exchange =
//!     MessageExchange::request(Message::new("quotes.get", "AAPL"), ReplyType::new("quote"));
//! let done = chain.process(exchange).await?;
//! assert!(done.is_complete_request());
//! # Ok(())
//! # }
//! ```
//!
//! ## Status
//! The public API is not yet stabilized.

pub mod backend;
pub mod caching;
pub mod config;
pub mod consumer;
pub mod correlation;
pub mod error;
pub mod exchange;
pub mod expires;
pub mod filter;
pub mod logging;
pub mod message;
pub mod prelude;
pub mod scheduler;
pub mod stats;

pub use caching::CachingFilterDecorator;
pub use consumer::{CachingConsumer, Consumer, DeliveryContext, ReplyChannel};
pub use correlation::CorrelationId;
pub use error::{BoxError, CacheError, PipelineError};
pub use filter::sending::SendingFilter;
pub use filter::timeout::ReplyTimeoutFilter;
pub use filter::{Filter, FilterChain, FilterDecorator, FilterInvoker, FilterKind};
pub use logging::{CacheEvent, CacheEventType, CacheLoggingConfig};
pub use scheduler::{SchedulerConfig, Ticket, TicketScheduler};
