use async_trait::async_trait;
use tower::util::ServiceFn;
use tower::{Service, ServiceExt};
use tracing::debug;

use super::{Filter, FilterInvoker, FilterKind};
use crate::error::{BoxError, PipelineError};
use crate::exchange::MessageExchange;

/// Terminal filter that hands the exchange to the transport.
///
/// The transport is any [`tower::Service`] taking a [`MessageExchange`] and
/// resolving to it, typically with the reply set for requests. The filter
/// never calls further down the chain.
#[derive(Clone)]
pub struct SendingFilter<S> {
    transport: S,
}

impl<S> SendingFilter<S> {
    pub fn new(transport: S) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &S {
        &self.transport
    }
}

impl<F> SendingFilter<ServiceFn<F>> {
    /// Uses an async closure as the sending action.
    pub fn from_fn(f: F) -> Self {
        Self::new(tower::service_fn(f))
    }
}

#[async_trait]
impl<S> Filter for SendingFilter<S>
where
    S: Service<MessageExchange, Response = MessageExchange> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError> + Send,
{
    fn kind(&self) -> FilterKind {
        FilterKind::SEND
    }

    async fn process(
        &self,
        exchange: MessageExchange,
        _invoker: &mut FilterInvoker,
    ) -> Result<MessageExchange, PipelineError> {
        let correlation_id = exchange.correlation_id().clone();
        debug!(
            label = %exchange.out().label(),
            correlation_id = %correlation_id,
            request = exchange.is_request(),
            "sending exchange"
        );

        self.transport
            .clone()
            .oneshot(exchange)
            .await
            .map_err(|err| PipelineError::Transport(err.into()))
    }
}
