//! Receive-side consumers and reply caching.
//!
//! A [`Consumer`] handles one incoming message through a [`DeliveryContext`].
//! Contexts that can reply carry a [`ReplyChannel`]; wrapping consumers may
//! push frames onto the context to observe replies on their way out.
//!
//! Frames live in a flat arena inside the context. Every frame records the
//! index of its parent, and [`DeliveryContext::reply`] walks from the current
//! frame to the root by index, running each frame's capture before the root
//! channel sends the reply.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

#[cfg(feature = "metrics")]
use metrics::counter;

use crate::backend::Cache;
use crate::config::CacheConfigurations;
use crate::error::PipelineError;
use crate::logging::{millis, CacheEvent, CacheEventType, CacheLoggingConfig, CacheSide};
use crate::message::{Message, MessageKey};
use crate::stats::CacheStats;

/// Sends replies back to the requester.
#[async_trait]
pub trait ReplyChannel: Send + Sync + 'static {
    async fn send_reply(&self, request: &Message, reply: Message) -> Result<(), PipelineError>;
}

/// Handles incoming messages.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    async fn handle(&self, context: &mut DeliveryContext) -> Result<(), PipelineError>;
}

/// Index of a frame in a [`DeliveryContext`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

impl FrameId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Cache write performed when a reply passes through a frame.
#[derive(Clone)]
pub struct ReplyCapture {
    cache: Arc<dyn Cache>,
    key: MessageKey,
    ttl: Duration,
    stats: Option<Arc<CacheStats>>,
    logging: CacheLoggingConfig,
}

impl ReplyCapture {
    pub fn new(cache: Arc<dyn Cache>, key: MessageKey, ttl: Duration) -> Self {
        Self {
            cache,
            key,
            ttl,
            stats: None,
            logging: CacheLoggingConfig::default(),
        }
    }

    pub fn with_stats(mut self, stats: Arc<CacheStats>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_logging(mut self, logging: CacheLoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    pub fn key(&self) -> MessageKey {
        self.key
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn store(&self, request: &Message, reply: &Message) -> Result<(), PipelineError> {
        self.cache.set(self.key, reply.clone(), self.ttl).await?;

        if let Some(stats) = &self.stats {
            stats.record_store();
        }
        #[cfg(feature = "metrics")]
        counter!("message_pipeline.cache.store", "side" => "receive").increment(1);
        CacheEvent::new(CacheEventType::Store, CacheSide::Receive, request.label().clone())
            .with_key(self.key)
            .with_ttl(self.ttl)
            .with_size(reply.payload().len())
            .log(&self.logging);
        debug!(key = %self.key, ttl_ms = millis(self.ttl), "captured reply");
        Ok(())
    }
}

impl fmt::Debug for ReplyCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyCapture")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[derive(Debug)]
struct Frame {
    parent: Option<FrameId>,
    capture: Option<ReplyCapture>,
}

/// Delivery of one incoming message to a consumer stack.
pub struct DeliveryContext {
    message: Message,
    channel: Option<Arc<dyn ReplyChannel>>,
    frames: Vec<Frame>,
    current: FrameId,
}

impl DeliveryContext {
    /// A context that replies through `channel`.
    pub fn new(message: Message, channel: Arc<dyn ReplyChannel>) -> Self {
        Self::with_channel(message, Some(channel))
    }

    /// A context for a message that expects no reply.
    pub fn one_way(message: Message) -> Self {
        Self::with_channel(message, None)
    }

    fn with_channel(message: Message, channel: Option<Arc<dyn ReplyChannel>>) -> Self {
        Self {
            message,
            channel,
            frames: vec![Frame {
                parent: None,
                capture: None,
            }],
            current: FrameId(0),
        }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn can_reply(&self) -> bool {
        self.channel.is_some()
    }

    /// The frame owning the reply channel.
    pub fn root(&self) -> FrameId {
        FrameId(0)
    }

    pub fn current(&self) -> FrameId {
        self.current
    }

    pub fn parent_of(&self, frame: FrameId) -> Option<FrameId> {
        self.frames.get(frame.0).and_then(|frame| frame.parent)
    }

    /// Number of frames between the current one and the root, inclusive.
    pub fn depth(&self) -> usize {
        self.lineage().count()
    }

    /// Pushes a frame with `capture` on top of the current one and makes it
    /// current.
    pub fn push_capture(&mut self, capture: ReplyCapture) -> FrameId {
        let id = FrameId(self.frames.len());
        self.frames.push(Frame {
            parent: Some(self.current),
            capture: Some(capture),
        });
        self.current = id;
        trace!(frame = id.0, "pushed capture frame");
        id
    }

    /// Drops the current frame and returns to its parent. The root is never
    /// popped.
    pub fn pop_frame(&mut self) {
        let Some(parent) = self.parent_of(self.current) else {
            return;
        };
        if self.current.0 + 1 == self.frames.len() {
            self.frames.pop();
        }
        self.current = parent;
    }

    /// Sends `reply`, running every capture from the current frame up to the
    /// root first.
    pub async fn reply(&self, reply: Message) -> Result<(), PipelineError> {
        let Some(channel) = &self.channel else {
            return Err(PipelineError::CannotReply(format!(
                "message `{}` expects no reply",
                self.message.label()
            )));
        };

        for frame in self.lineage() {
            if let Some(capture) = &self.frames[frame.0].capture {
                capture.store(&self.message, &reply).await?;
            }
        }

        channel.send_reply(&self.message, reply).await
    }

    fn lineage(&self) -> impl Iterator<Item = FrameId> + '_ {
        std::iter::successors(Some(self.current), move |frame| self.parent_of(*frame))
    }
}

impl fmt::Debug for DeliveryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryContext")
            .field("message", &self.message)
            .field("can_reply", &self.can_reply())
            .field("frames", &self.frames)
            .field("current", &self.current)
            .finish()
    }
}

/// Serves cached replies to incoming requests and caches fresh ones.
pub struct CachingConsumer<C> {
    inner: C,
    configurations: Arc<CacheConfigurations>,
    stats: Arc<CacheStats>,
    logging: CacheLoggingConfig,
}

impl<C> CachingConsumer<C> {
    pub fn new(inner: C, configurations: Arc<CacheConfigurations>) -> Self {
        Self {
            inner,
            configurations,
            stats: Arc::new(CacheStats::new()),
            logging: CacheLoggingConfig::default(),
        }
    }

    pub fn with_stats(mut self, stats: Arc<CacheStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_logging(mut self, logging: CacheLoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.stats
    }
}

#[async_trait]
impl<C> Consumer for CachingConsumer<C>
where
    C: Consumer,
{
    async fn handle(&self, context: &mut DeliveryContext) -> Result<(), PipelineError> {
        let label = context.message().label().clone();
        let active = if context.can_reply() {
            self.configurations.active(&label)
        } else {
            None
        };
        let Some((cache, ttl)) = active else {
            self.stats.record_bypass();
            CacheEvent::new(CacheEventType::Bypass, CacheSide::Receive, label).log(&self.logging);
            return self.inner.handle(context).await;
        };
        let cache = cache.clone();
        let key = context.message().key();

        if cache.contains_key(&key).await? {
            let cached = cache.get(&key).await?;

            self.stats.record_hit();
            #[cfg(feature = "metrics")]
            counter!("message_pipeline.cache.hit", "side" => "receive").increment(1);
            CacheEvent::new(CacheEventType::Hit, CacheSide::Receive, label)
                .with_key(key)
                .with_size(cached.payload().len())
                .log(&self.logging);
            debug!(%key, "answering from cache");

            return context.reply(cached).await;
        }

        self.stats.record_miss();
        #[cfg(feature = "metrics")]
        counter!("message_pipeline.cache.miss", "side" => "receive").increment(1);
        CacheEvent::new(CacheEventType::Miss, CacheSide::Receive, label)
            .with_key(key)
            .log(&self.logging);

        context.push_capture(
            ReplyCapture::new(cache, key, ttl)
                .with_stats(self.stats.clone())
                .with_logging(self.logging.clone()),
        );
        let result = self.inner.handle(context).await;
        context.pop_frame();
        result
    }
}
