//! Consumers, deliveries, and acknowledgments.

use std::fmt;
use std::sync::Arc;

use crate::broker::{Delivered, Pull, Shared};
use crate::{BrokerError, ChannelId, DeliveryTag, Properties};

/// A stream of deliveries from one queue.
///
/// Deliveries are pulled one at a time with [`next`](Self::next). The
/// stream ends (`None`) when the channel or connection closes, the
/// consumer is cancelled, or the queue is deleted.
pub struct Consumer {
    channel: ChannelId,
    tag: String,
    queue: String,
    shared: Arc<Shared>,
}

impl Consumer {
    pub(crate) fn new(
        channel: ChannelId,
        tag: String,
        queue: String,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            channel,
            tag,
            queue,
            shared,
        }
    }

    /// The consumer tag assigned by [`Channel::basic_consume`](crate::Channel::basic_consume).
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The queue this consumer reads from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Waits for the next delivery.
    ///
    /// Parks while the queue is empty or the channel's prefetch limit is
    /// exhausted. Returns `None` once the consumer can never receive again.
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            // Register interest before inspecting state so a wake-up that
            // races with the check is not lost.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let pulled = self.shared.lock().pull(self.channel, &self.tag);
            match pulled {
                Pull::Ready(delivered) => {
                    return Some(Delivery::new(
                        self.channel,
                        delivered,
                        Arc::clone(&self.shared),
                    ));
                }
                Pull::Closed => return None,
                Pull::Empty => notified.await,
            }
        }
    }

    /// Stops consuming. Deliveries already handed out stay outstanding
    /// until acknowledged.
    pub async fn cancel(self) {
        self.shared
            .mutate(|state| state.cancel(self.channel, &self.tag));
        tracing::debug!(consumer = %self.tag, queue = %self.queue, "consumer cancelled");
    }
}

/// One message handed to a consumer.
///
/// The [`Acker`] must be used exactly once; it is consumed by value so a
/// delivery cannot be acknowledged twice.
#[derive(Debug)]
pub struct Delivery {
    /// Channel-scoped tag of this delivery.
    pub delivery_tag: DeliveryTag,
    /// Exchange the message was published (or dead-lettered) to.
    pub exchange: String,
    /// Routing key the message was published with.
    pub routing_key: String,
    /// `true` if the message was requeued at least once before.
    pub redelivered: bool,
    /// Content type and headers.
    pub properties: Properties,
    /// Message body.
    pub data: Vec<u8>,
    /// Settles this delivery.
    pub acker: Acker,
}

impl Delivery {
    pub(crate) fn new(
        channel: ChannelId,
        delivered: Delivered,
        shared: Arc<Shared>,
    ) -> Self {
        let Delivered { tag, message } = delivered;
        Self {
            delivery_tag: tag,
            exchange: message.exchange,
            routing_key: message.routing_key,
            redelivered: message.redelivered,
            properties: message.properties,
            data: message.body,
            acker: Acker {
                channel,
                tag,
                shared,
            },
        }
    }
}

/// Settles one outstanding delivery.
pub struct Acker {
    channel: ChannelId,
    tag: DeliveryTag,
    shared: Arc<Shared>,
}

impl Acker {
    /// The delivery this acker settles.
    pub fn delivery_tag(&self) -> DeliveryTag {
        self.tag
    }

    /// Positive acknowledgment: the message is removed for good.
    ///
    /// # Errors
    /// [`BrokerError::ChannelClosed`] if the channel closed first (the
    /// message has then already been requeued).
    pub async fn ack(self) -> Result<(), BrokerError> {
        self.shared.mutate(|state| state.ack(self.channel, self.tag))
    }

    /// Negative acknowledgment.
    ///
    /// With `requeue` the message returns to the head of its queue and is
    /// flagged as redelivered. Without it the message is dead-lettered if
    /// the queue has a dead-letter exchange, and dropped otherwise.
    pub async fn nack(self, requeue: bool) -> Result<(), BrokerError> {
        self.shared
            .mutate(|state| state.reject(self.channel, self.tag, requeue))
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("channel", &self.channel)
            .field("tag", &self.tag)
            .field("queue", &self.queue)
            .finish()
    }
}

impl fmt::Debug for Acker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acker")
            .field("channel", &self.channel)
            .field("tag", &self.tag)
            .finish()
    }
}
