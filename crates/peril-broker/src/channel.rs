//! Connection and channel handles.
//!
//! A [`Connection`] is shared process-wide; every subscriber and publisher
//! opens its own [`Channel`] on it so that channel-level failures stay
//! isolated. Closing the connection closes every channel and every
//! consumer that depends on it.

use std::fmt;
use std::sync::Arc;

use crate::broker::Shared;
use crate::{
    BrokerError, ChannelId, ConnectionId, Consumer, Delivery, ExchangeKind,
    ExchangeOptions, FieldTable, Properties, Queue, QueueOptions,
};

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A connection to the broker. Cheap to clone; clones share the same
/// underlying connection.
#[derive(Clone)]
pub struct Connection {
    id: ConnectionId,
    shared: Arc<Shared>,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, shared: Arc<Shared>) -> Self {
        Self { id, shared }
    }

    /// Returns the unique identifier for this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns `true` until [`close`](Self::close) is called or the
    /// broker restarts.
    pub fn is_open(&self) -> bool {
        self.shared.lock().connection_open(self.id)
    }

    /// Opens a fresh channel on this connection.
    ///
    /// # Errors
    /// [`BrokerError::ConnectionClosed`] if the connection is closed.
    pub async fn create_channel(&self) -> Result<Channel, BrokerError> {
        let id = self.shared.mutate(|state| state.open_channel(self.id))?;
        tracing::trace!(conn = %self.id, channel = %id, "channel opened");
        Ok(Channel {
            id,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Closes the connection.
    ///
    /// Every channel is closed (unacked deliveries are requeued), every
    /// consumer stream ends, and exclusive queues declared through this
    /// connection are deleted. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), BrokerError> {
        if self.shared.mutate(|state| state.close_connection(self.id)) {
            tracing::debug!(conn = %self.id, "connection closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A logical channel multiplexed over a [`Connection`].
///
/// Cheap to clone; clones share the same channel, its QoS setting, and
/// its outstanding deliveries.
#[derive(Clone)]
pub struct Channel {
    id: ChannelId,
    shared: Arc<Shared>,
}

impl Channel {
    /// Returns the unique identifier for this channel.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Returns `true` until the channel or its connection is closed.
    pub fn is_open(&self) -> bool {
        self.shared.lock().channel_open(self.id)
    }

    /// Declares an exchange. Idempotent for identical parameters.
    ///
    /// # Errors
    /// [`BrokerError::PreconditionFailed`] if the exchange exists with a
    /// different kind or durability.
    pub async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<(), BrokerError> {
        self.shared
            .mutate(|state| state.declare_exchange(self.id, name, kind, options))
    }

    /// Declares a queue. Idempotent for identical parameters.
    ///
    /// An empty `name` asks the broker to generate one.
    ///
    /// # Errors
    /// - [`BrokerError::PreconditionFailed`] if the queue exists with
    ///   different options or arguments. The existing queue is untouched.
    /// - [`BrokerError::ResourceLocked`] if the queue is exclusive to
    ///   another connection.
    pub async fn queue_declare(
        &self,
        name: &str,
        options: QueueOptions,
        arguments: FieldTable,
    ) -> Result<Queue, BrokerError> {
        self.shared.mutate(|state| {
            state.declare_queue(self.id, name, options, arguments)
        })
    }

    /// Binds `queue` to `exchange` under `routing_key`.
    ///
    /// # Errors
    /// [`BrokerError::ExchangeNotFound`] or [`BrokerError::QueueNotFound`]
    /// when either side does not exist.
    pub async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.shared.mutate(|state| {
            state.bind_queue(self.id, queue, exchange, routing_key)
        })
    }

    /// Number of messages ready for delivery in `queue`.
    pub async fn message_count(&self, queue: &str) -> Result<usize, BrokerError> {
        self.shared.mutate(|state| state.message_count(self.id, queue))
    }

    /// Drops every ready message in `queue`. Returns how many were dropped.
    pub async fn queue_purge(&self, queue: &str) -> Result<usize, BrokerError> {
        self.shared.mutate(|state| state.purge_queue(self.id, queue))
    }

    /// Deletes `queue`, its bindings, and its ready messages. Consumers of
    /// the queue end. Returns how many ready messages were dropped.
    ///
    /// # Errors
    /// [`BrokerError::QueueNotFound`] if the queue does not exist,
    /// [`BrokerError::ResourceLocked`] if it is exclusive to another
    /// connection.
    pub async fn queue_delete(&self, queue: &str) -> Result<usize, BrokerError> {
        self.shared.mutate(|state| state.remove_queue(self.id, queue))
    }

    /// Limits how many deliveries may be outstanding (unacknowledged) on
    /// this channel at once. 0 removes the limit.
    pub async fn basic_qos(&self, prefetch_count: u16) -> Result<(), BrokerError> {
        self.shared
            .mutate(|state| state.set_prefetch(self.id, prefetch_count))
    }

    /// Starts consuming from `queue`. An empty `consumer_tag` asks the
    /// broker to generate one.
    pub async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Consumer, BrokerError> {
        let tag = self
            .shared
            .mutate(|state| state.consume(self.id, queue, consumer_tag))?;
        tracing::debug!(channel = %self.id, queue, consumer = %tag, "consumer started");
        Ok(Consumer::new(
            self.id,
            tag,
            queue.to_string(),
            Arc::clone(&self.shared),
        ))
    }

    /// Fetches a single message from `queue` without a consumer.
    /// The delivery must still be acknowledged.
    pub async fn basic_get(
        &self,
        queue: &str,
    ) -> Result<Option<Delivery>, BrokerError> {
        let delivered = self.shared.mutate(|state| state.get(self.id, queue))?;
        Ok(delivered
            .map(|d| Delivery::new(self.id, d, Arc::clone(&self.shared))))
    }

    /// Publishes a message. Unroutable messages are silently dropped.
    ///
    /// # Errors
    /// [`BrokerError::ExchangeNotFound`] if the exchange does not exist,
    /// [`BrokerError::ChannelClosed`] if the channel is closed.
    pub async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: Properties,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let routed = self.shared.mutate(|state| {
            state.publish(self.id, exchange, routing_key, properties, body)
        })?;
        tracing::trace!(channel = %self.id, exchange, routing_key, routed, "published");
        Ok(())
    }

    /// Closes the channel. Unacked deliveries are requeued and its
    /// consumers end. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), BrokerError> {
        if self.shared.mutate(|state| state.close_channel(self.id)) {
            tracing::trace!(channel = %self.id, "channel closed");
        }
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("id", &self.id).finish()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}
