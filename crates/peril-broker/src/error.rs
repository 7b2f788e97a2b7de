use crate::{ChannelId, DeliveryTag};

/// Errors returned by broker operations.
///
/// Mirrors the AMQP reply codes the dispatch engine cares about:
/// `NOT_FOUND`, `PRECONDITION_FAILED`, `RESOURCE_LOCKED`, and closed
/// channels/connections.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The connection was closed (explicitly or by a broker restart).
    #[error("connection closed")]
    ConnectionClosed,

    /// The channel was closed.
    #[error("channel {0} closed")]
    ChannelClosed(ChannelId),

    /// No exchange with this name has been declared.
    #[error("no exchange '{0}'")]
    ExchangeNotFound(String),

    /// No queue with this name exists.
    #[error("no queue '{0}'")]
    QueueNotFound(String),

    /// A redeclaration disagrees with the existing entity.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The queue is exclusive to another connection.
    #[error("queue '{0}' is locked by another connection")]
    ResourceLocked(String),

    /// The delivery tag is not outstanding on this channel.
    #[error("unknown delivery tag {0}")]
    UnknownDeliveryTag(DeliveryTag),
}
