use std::fmt;

use crate::correlation::CorrelationId;
use crate::message::Message;

/// Name of the reply type a requester expects back.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyType(String);

impl ReplyType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Uses the Rust type name of `T`.
    pub fn of<T: ?Sized>() -> Self {
        Self(std::any::type_name::<T>().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of message traffic moving through the filter chain.
///
/// An exchange is created right before entering the pipeline, mutated in
/// place by filters (setting the incoming reply) and dropped once the
/// pipeline completes. It is owned by exactly one pipeline run.
#[derive(Debug, Clone)]
pub struct MessageExchange {
    out: Message,
    incoming: Option<Message>,
    expected_reply_type: Option<ReplyType>,
    correlation_id: CorrelationId,
}

impl MessageExchange {
    /// Creates a one-way exchange that expects no reply.
    pub fn one_way(out: Message) -> Self {
        let correlation_id = CorrelationId::from_message(&out);
        Self {
            out,
            incoming: None,
            expected_reply_type: None,
            correlation_id,
        }
    }

    /// Creates a request exchange awaiting a reply of `reply_type`.
    pub fn request(out: Message, reply_type: ReplyType) -> Self {
        let correlation_id = CorrelationId::from_message(&out);
        Self {
            out,
            incoming: None,
            expected_reply_type: Some(reply_type),
            correlation_id,
        }
    }

    pub fn out(&self) -> &Message {
        &self.out
    }

    /// The reply, once produced or retrieved.
    pub fn incoming(&self) -> Option<&Message> {
        self.incoming.as_ref()
    }

    pub fn set_incoming(&mut self, message: Message) {
        self.incoming = Some(message);
    }

    pub fn take_incoming(&mut self) -> Option<Message> {
        self.incoming.take()
    }

    pub fn expected_reply_type(&self) -> Option<&ReplyType> {
        self.expected_reply_type.as_ref()
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn is_request(&self) -> bool {
        self.expected_reply_type.is_some()
    }

    /// A request still waiting for its reply.
    pub fn is_incomplete_request(&self) -> bool {
        self.is_request() && self.incoming.is_none()
    }

    /// A request whose reply has arrived.
    pub fn is_complete_request(&self) -> bool {
        self.is_request() && self.incoming.is_some()
    }
}
