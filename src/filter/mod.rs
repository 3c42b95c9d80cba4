//! The filter chain.
//!
//! Every message exchange is driven through an ordered list of [`Filter`]s.
//! A filter either finishes the exchange itself or hands it on with
//! [`FilterInvoker::proceed`]. Cross-cutting behavior is attached with a
//! [`FilterDecorator`] registered against a filter's [`FilterKind`]; the
//! decorator runs *instead of* the filter and receives the filter so it can
//! still call through.
//!
//! # Execution order
//!
//! Filters run in **reverse registration order**: for a chain built from
//! `[f0, f1, f2]`, `f2` runs first and `f0` runs last. Register the
//! transport-facing [`SendingFilter`](sending::SendingFilter) first so it
//! ends up innermost.
//!
//! ```
//! use std::sync::Arc;
//! use message_pipeline::prelude::*;
//!
//! # async fn run() -> Result<(), PipelineError> {
//! let transport = tower::service_fn(|mut exchange: MessageExchange| async move {
//!     exchange.set_incoming(Message::reply("pong"));
//!     Ok::<_, std::convert::Infallible>(exchange)
//! });
//!
//! let chain = FilterChain::builder()
//!     .filter(SendingFilter::new(transport))
//!     .build();
//!
//! let exchange = MessageExchange::request(Message::new("ping", "hi"), ReplyType::new("pong"));
//! let done = chain.process(exchange).await?;
//! assert!(done.is_complete_request());
//! # Ok(())
//! # }
//! ```

pub mod sending;
pub mod timeout;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::trace;

use crate::error::PipelineError;
use crate::exchange::MessageExchange;

/// Stable identifier of a filter implementation.
///
/// Decorators are registered against a kind, not against a runtime type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterKind(Cow<'static, str>);

impl FilterKind {
    /// The terminal filter that hands exchanges to the transport.
    pub const SEND: FilterKind = FilterKind::from_static("send");
    /// The filter enforcing reply timeouts.
    pub const REPLY_TIMEOUT: FilterKind = FilterKind::from_static("reply-timeout");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One step of the pipeline.
#[async_trait]
pub trait Filter: Send + Sync + 'static {
    fn kind(&self) -> FilterKind;

    /// Processes `exchange`.
    ///
    /// Call `invoker.proceed(exchange)` to run the rest of the chain, or
    /// return directly to short-circuit it.
    async fn process(
        &self,
        exchange: MessageExchange,
        invoker: &mut FilterInvoker,
    ) -> Result<MessageExchange, PipelineError>;
}

/// Intercepts every invocation of filters of one [`FilterKind`].
///
/// A decorator may call the wrapped `filter`, skip it with
/// `invoker.proceed`, or resolve the exchange itself.
#[async_trait]
pub trait FilterDecorator: Send + Sync + 'static {
    async fn process(
        &self,
        filter: &dyn Filter,
        exchange: MessageExchange,
        invoker: &mut FilterInvoker,
    ) -> Result<MessageExchange, PipelineError>;
}

/// Decorators keyed by the kind of filter they wrap.
#[derive(Clone, Default)]
pub struct DecoratorRegistry {
    decorators: HashMap<FilterKind, Arc<dyn FilterDecorator>>,
}

impl DecoratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `decorator` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: FilterKind, decorator: Arc<dyn FilterDecorator>) {
        self.decorators.insert(kind, decorator);
    }

    pub fn with(mut self, kind: FilterKind, decorator: Arc<dyn FilterDecorator>) -> Self {
        self.register(kind, decorator);
        self
    }

    pub fn get(&self, kind: &FilterKind) -> Option<&Arc<dyn FilterDecorator>> {
        self.decorators.get(kind)
    }

    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }
}

impl fmt::Debug for DecoratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorRegistry")
            .field("kinds", &self.decorators.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A filter together with the decorator resolved for it at build time.
#[derive(Clone)]
struct Stage {
    kind: FilterKind,
    filter: Arc<dyn Filter>,
    decorator: Option<Arc<dyn FilterDecorator>>,
}

/// Immutable, shareable filter pipeline.
///
/// Cloning is cheap. Each run gets its own single-use [`FilterInvoker`];
/// see the [module docs](self) for the execution order contract.
#[derive(Clone)]
pub struct FilterChain {
    stages: Arc<[Stage]>,
}

impl FilterChain {
    /// Builds a chain without decorators.
    pub fn new(filters: Vec<Arc<dyn Filter>>) -> Self {
        Self::with_decorators(filters, &DecoratorRegistry::default())
    }

    /// Builds a chain, resolving each filter's decorator once.
    pub fn with_decorators(filters: Vec<Arc<dyn Filter>>, registry: &DecoratorRegistry) -> Self {
        let stages = filters
            .into_iter()
            .map(|filter| {
                let kind = filter.kind();
                let decorator = registry.get(&kind).cloned();
                Stage {
                    kind,
                    filter,
                    decorator,
                }
            })
            .collect::<Vec<_>>();

        Self {
            stages: stages.into(),
        }
    }

    pub fn builder() -> FilterChainBuilder {
        FilterChainBuilder::default()
    }

    /// A fresh invoker whose first step runs the last registered filter.
    pub fn invoker(&self) -> FilterInvoker {
        FilterInvoker {
            stages: self.stages.clone(),
            cursor: self.stages.len(),
        }
    }

    /// Runs `exchange` through the whole chain.
    pub async fn process(
        &self,
        exchange: MessageExchange,
    ) -> Result<MessageExchange, PipelineError> {
        self.invoker().process(exchange).await
    }

    /// Filter kinds in the order they execute (reverse of registration).
    pub fn execution_order(&self) -> Vec<FilterKind> {
        self.stages.iter().rev().map(|stage| stage.kind.clone()).collect()
    }

    /// Whether a decorator was resolved for any filter of `kind`.
    pub fn is_decorated(&self, kind: &FilterKind) -> bool {
        self.stages
            .iter()
            .any(|stage| &stage.kind == kind && stage.decorator.is_some())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("execution_order", &self.execution_order())
            .finish()
    }
}

impl Service<MessageExchange> for FilterChain {
    type Response = MessageExchange;
    type Error = PipelineError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, exchange: MessageExchange) -> Self::Future {
        let chain = self.clone();
        Box::pin(async move { chain.process(exchange).await })
    }
}

/// Builder for [`FilterChain`]. Filters are listed in registration order.
#[derive(Default)]
pub struct FilterChainBuilder {
    filters: Vec<Arc<dyn Filter>>,
    decorators: DecoratorRegistry,
}

impl FilterChainBuilder {
    /// Appends `filter`. It will run *before* every filter registered so far.
    pub fn filter<F: Filter>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn shared_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Decorates every filter of `kind` with `decorator`.
    pub fn decorate<D: FilterDecorator>(mut self, kind: FilterKind, decorator: D) -> Self {
        self.decorators.register(kind, Arc::new(decorator));
        self
    }

    pub fn shared_decorator(
        mut self,
        kind: FilterKind,
        decorator: Arc<dyn FilterDecorator>,
    ) -> Self {
        self.decorators.register(kind, decorator);
        self
    }

    pub fn build(self) -> FilterChain {
        FilterChain::with_decorators(self.filters, &self.decorators)
    }
}

/// Single-use cursor over a [`FilterChain`] for one exchange.
///
/// Must not be shared between exchanges.
pub struct FilterInvoker {
    stages: Arc<[Stage]>,
    cursor: usize,
}

impl FilterInvoker {
    /// Entry point for a pipeline run; same as one [`proceed`](Self::proceed).
    pub async fn process(
        &mut self,
        exchange: MessageExchange,
    ) -> Result<MessageExchange, PipelineError> {
        self.proceed(exchange).await
    }

    /// Runs the next filter, or completes with `exchange` unchanged when the
    /// chain is exhausted.
    pub fn proceed(
        &mut self,
        exchange: MessageExchange,
    ) -> BoxFuture<'_, Result<MessageExchange, PipelineError>> {
        Box::pin(async move {
            let Some(stage) = self.next_stage() else {
                return Ok(exchange);
            };

            trace!(
                filter = %stage.kind,
                decorated = stage.decorator.is_some(),
                correlation_id = %exchange.correlation_id(),
                "invoking filter"
            );

            match &stage.decorator {
                Some(decorator) => {
                    decorator
                        .process(stage.filter.as_ref(), exchange, self)
                        .await
                }
                None => stage.filter.process(exchange, self).await,
            }
        })
    }

    /// Filters that have not run yet.
    pub fn remaining(&self) -> usize {
        self.cursor
    }

    fn next_stage(&mut self) -> Option<Stage> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        Some(self.stages[self.cursor].clone())
    }
}

impl fmt::Debug for FilterInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterInvoker")
            .field("len", &self.stages.len())
            .field("remaining", &self.cursor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ReplyType;
    use crate::message::Message;
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: &'static str,
        journal: Journal,
        short_circuit: bool,
    }

    impl Recording {
        fn new(name: &'static str, journal: &Journal) -> Self {
            Self {
                name,
                journal: journal.clone(),
                short_circuit: false,
            }
        }

        fn short_circuit(mut self) -> Self {
            self.short_circuit = true;
            self
        }
    }

    #[async_trait]
    impl Filter for Recording {
        fn kind(&self) -> FilterKind {
            FilterKind::from_static(self.name)
        }

        async fn process(
            &self,
            exchange: MessageExchange,
            invoker: &mut FilterInvoker,
        ) -> Result<MessageExchange, PipelineError> {
            self.journal.lock().unwrap().push(self.name.to_owned());
            if self.short_circuit {
                return Ok(exchange);
            }
            invoker.proceed(exchange).await
        }
    }

    struct Failing;

    #[async_trait]
    impl Filter for Failing {
        fn kind(&self) -> FilterKind {
            FilterKind::from_static("failing")
        }

        async fn process(
            &self,
            _exchange: MessageExchange,
            _invoker: &mut FilterInvoker,
        ) -> Result<MessageExchange, PipelineError> {
            Err(PipelineError::filter("boom"))
        }
    }

    struct Announce {
        journal: Journal,
    }

    #[async_trait]
    impl FilterDecorator for Announce {
        async fn process(
            &self,
            filter: &dyn Filter,
            exchange: MessageExchange,
            invoker: &mut FilterInvoker,
        ) -> Result<MessageExchange, PipelineError> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("decorated:{}", filter.kind()));
            filter.process(exchange, invoker).await
        }
    }

    fn exchange() -> MessageExchange {
        MessageExchange::request(Message::new("quotes.get", "AAPL"), ReplyType::new("quote"))
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn runs_filters_in_reverse_registration_order() {
        let journal = Journal::default();
        let chain = FilterChain::builder()
            .filter(Recording::new("f0", &journal))
            .filter(Recording::new("f1", &journal))
            .filter(Recording::new("f2", &journal))
            .build();

        chain.process(exchange()).await.expect("chain completes");

        assert_eq!(entries(&journal), ["f2", "f1", "f0"]);
        assert_eq!(
            chain.execution_order(),
            [
                FilterKind::from_static("f2"),
                FilterKind::from_static("f1"),
                FilterKind::from_static("f0")
            ]
        );
    }

    #[tokio::test]
    async fn empty_chain_returns_exchange_unchanged() {
        let chain = FilterChain::new(Vec::new());
        let done = chain.process(exchange()).await.expect("chain completes");
        assert!(done.is_incomplete_request());
        assert_eq!(done.out(), exchange().out());
    }

    #[tokio::test]
    async fn short_circuit_skips_remaining_filters() {
        let journal = Journal::default();
        let chain = FilterChain::builder()
            .filter(Recording::new("f0", &journal))
            .filter(Recording::new("f1", &journal).short_circuit())
            .filter(Recording::new("f2", &journal))
            .build();

        chain.process(exchange()).await.expect("chain completes");
        assert_eq!(entries(&journal), ["f2", "f1"]);
    }

    #[tokio::test]
    async fn decorator_replaces_matching_filter_only() {
        let journal = Journal::default();
        let chain = FilterChain::builder()
            .filter(Recording::new("f0", &journal))
            .filter(Recording::new("f1", &journal))
            .decorate(
                FilterKind::from_static("f0"),
                Announce {
                    journal: journal.clone(),
                },
            )
            .build();

        assert!(chain.is_decorated(&FilterKind::from_static("f0")));
        assert!(!chain.is_decorated(&FilterKind::from_static("f1")));

        chain.process(exchange()).await.expect("chain completes");
        assert_eq!(entries(&journal), ["f1", "decorated:f0", "f0"]);
    }

    #[tokio::test]
    async fn errors_propagate_without_retry() {
        let journal = Journal::default();
        let chain = FilterChain::builder()
            .filter(Failing)
            .filter(Recording::new("outer", &journal))
            .build();

        let err = chain.process(exchange()).await.expect_err("chain fails");
        assert!(matches!(err, PipelineError::Filter(_)));
        assert_eq!(entries(&journal), ["outer"]);
    }

    #[tokio::test]
    async fn invoker_is_exhausted_after_run() {
        let journal = Journal::default();
        let chain = FilterChain::builder()
            .filter(Recording::new("only", &journal))
            .build();

        let mut invoker = chain.invoker();
        assert_eq!(invoker.remaining(), 1);
        invoker.process(exchange()).await.expect("chain completes");
        assert_eq!(invoker.remaining(), 0);

        // A spent invoker behaves like an empty chain.
        invoker.process(exchange()).await.expect("identity result");
        assert_eq!(entries(&journal), ["only"]);
    }

    #[tokio::test]
    async fn chain_is_a_tower_service() {
        use tower::ServiceExt;

        let journal = Journal::default();
        let chain = FilterChain::builder()
            .filter(Recording::new("f0", &journal))
            .build();

        chain.oneshot(exchange()).await.expect("service call completes");
        assert_eq!(entries(&journal), ["f0"]);
    }
}
