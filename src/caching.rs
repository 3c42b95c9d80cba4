//! Response caching for outgoing requests.
//!
//! [`CachingFilterDecorator`] is registered against a filter kind (normally
//! [`FilterKind::SEND`](crate::filter::FilterKind::SEND)). For routes with an
//! active [`CacheConfiguration`](crate::config::CacheConfiguration) it serves
//! repeated requests from the cache and stores fresh replies after a live
//! round-trip.
//!
//! Hit checks and writes are not one transaction: concurrent misses on the
//! same key all reach the filter and the last write wins.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::config::CacheConfigurations;
use crate::error::PipelineError;
use crate::exchange::MessageExchange;
use crate::expires::Expires;
use crate::filter::{Filter, FilterDecorator, FilterInvoker};
use crate::logging::{millis, CacheEvent, CacheEventType, CacheLoggingConfig, CacheSide};
use crate::message::{Label, Message};
use crate::stats::CacheStats;

/// Caching decorator for the send side of the pipeline.
#[derive(Debug, Clone)]
pub struct CachingFilterDecorator {
    configurations: Arc<CacheConfigurations>,
    stats: Arc<CacheStats>,
    logging: CacheLoggingConfig,
}

impl CachingFilterDecorator {
    pub fn new(configurations: Arc<CacheConfigurations>) -> Self {
        Self {
            configurations,
            stats: Arc::new(CacheStats::new()),
            logging: CacheLoggingConfig::default(),
        }
    }

    /// Shares `stats` with other decorators or consumers.
    pub fn with_stats(mut self, stats: Arc<CacheStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_logging(mut self, logging: CacheLoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }

    pub fn configurations(&self) -> &Arc<CacheConfigurations> {
        &self.configurations
    }

    fn event(&self, event_type: CacheEventType, exchange: &MessageExchange) -> CacheEvent {
        CacheEvent::new(event_type, CacheSide::Send, exchange.out().label().clone())
            .with_correlation_id(exchange.correlation_id().clone())
    }
}

#[async_trait]
impl FilterDecorator for CachingFilterDecorator {
    async fn process(
        &self,
        filter: &dyn Filter,
        mut exchange: MessageExchange,
        invoker: &mut FilterInvoker,
    ) -> Result<MessageExchange, PipelineError> {
        // Not a pending request: skip the decorated filter as well, straight
        // to the next step of the chain.
        if !exchange.is_incomplete_request() {
            return invoker.proceed(exchange).await;
        }

        let Some((cache, route_ttl)) = self.configurations.active(exchange.out().label()) else {
            self.stats.record_bypass();
            self.event(CacheEventType::Bypass, &exchange).log(&self.logging);
            return filter.process(exchange, invoker).await;
        };
        let cache = cache.clone();
        let key = exchange.out().key();

        if cache.contains_key(&key).await? {
            let cached = cache.get(&key).await?;

            self.stats.record_hit();
            #[cfg(feature = "metrics")]
            counter!("message_pipeline.cache.hit", "side" => "send").increment(1);
            self.event(CacheEventType::Hit, &exchange)
                .with_key(key)
                .with_size(cached.payload().len())
                .log(&self.logging);
            debug!(%key, label = %exchange.out().label(), "serving reply from cache");

            exchange.set_incoming(cached.with_label(Label::empty()));
            return Ok(exchange);
        }

        self.stats.record_miss();
        #[cfg(feature = "metrics")]
        counter!("message_pipeline.cache.miss", "side" => "send").increment(1);
        self.event(CacheEventType::Miss, &exchange)
            .with_key(key)
            .log(&self.logging);

        let exchange = filter.process(exchange, invoker).await?;
        if !exchange.is_complete_request() {
            return Ok(exchange);
        }
        let Some(reply) = exchange.incoming() else {
            return Ok(exchange);
        };
        let Some(ttl) = effective_ttl(Some(route_ttl), reply) else {
            debug!(%key, "reply carries no usable ttl, not caching");
            return Ok(exchange);
        };

        cache.set(key, reply.clone(), ttl).await?;

        self.stats.record_store();
        #[cfg(feature = "metrics")]
        counter!("message_pipeline.cache.store", "side" => "send").increment(1);
        self.event(CacheEventType::Store, &exchange)
            .with_key(key)
            .with_ttl(ttl)
            .with_size(reply.payload().len())
            .log(&self.logging);
        debug!(%key, ttl_ms = millis(ttl), "cached reply");

        Ok(exchange)
    }
}

/// TTL for storing `reply`: the route's TTL, else the reply's `x-expires`
/// descriptor. `None` means the reply is not cached.
pub fn effective_ttl(route_ttl: Option<Duration>, reply: &Message) -> Option<Duration> {
    route_ttl.or_else(|| Expires::from_message(reply).and_then(|expires| expires.ttl()))
}
