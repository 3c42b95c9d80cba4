use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

#[cfg(feature = "metrics")]
use metrics::counter;

use super::{Filter, FilterInvoker, FilterKind};
use crate::error::PipelineError;
use crate::exchange::MessageExchange;
use crate::logging::millis;
use crate::message::headers;
use crate::scheduler::TicketScheduler;

/// Fails requests whose reply does not arrive in time.
///
/// The deadline is the request's `x-timeout` header in milliseconds, falling
/// back to the filter's default. The timer is a [`TicketScheduler`] job that
/// is cancelled as soon as the rest of the chain completes, so timing
/// resolution is the scheduler's check interval. One-way exchanges and
/// requests that already have a reply pass straight through.
pub struct ReplyTimeoutFilter {
    scheduler: Arc<TicketScheduler>,
    default_timeout: Duration,
}

impl ReplyTimeoutFilter {
    pub fn new(scheduler: Arc<TicketScheduler>, default_timeout: Duration) -> Self {
        Self {
            scheduler,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn timeout_for(&self, exchange: &MessageExchange) -> Duration {
        match exchange.out().header(headers::TIMEOUT) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms),
                Err(_) => {
                    warn!(value = raw, "ignoring malformed timeout header");
                    self.default_timeout
                }
            },
            None => self.default_timeout,
        }
    }
}

#[async_trait]
impl Filter for ReplyTimeoutFilter {
    fn kind(&self) -> FilterKind {
        FilterKind::REPLY_TIMEOUT
    }

    async fn process(
        &self,
        exchange: MessageExchange,
        invoker: &mut FilterInvoker,
    ) -> Result<MessageExchange, PipelineError> {
        if !exchange.is_incomplete_request() {
            return invoker.proceed(exchange).await;
        }

        let timeout = self.timeout_for(&exchange);
        let correlation_id = exchange.correlation_id().clone();

        let (expired_tx, expired_rx) = oneshot::channel();
        let ticket = self.scheduler.acquire(timeout, move || {
            let _ = expired_tx.send(());
            Ok(())
        });

        // A dropped sender (scheduler shut down) disables the timeout branch.
        tokio::select! {
            result = invoker.proceed(exchange) => {
                self.scheduler.cancel(ticket);
                result
            }
            Ok(()) = expired_rx => {
                #[cfg(feature = "metrics")]
                counter!("message_pipeline.reply_timeout").increment(1);

                debug!(
                    %ticket,
                    correlation_id = %correlation_id,
                    timeout_ms = millis(timeout),
                    "reply timed out"
                );
                Err(PipelineError::ReplyTimeout {
                    correlation_id,
                    timeout,
                })
            }
        }
    }
}
