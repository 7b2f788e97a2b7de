//! The broker operations the engine is built on.
//!
//! Topology, publishing, and the dispatch loop only ever talk to a broker
//! through these three traits:
//!
//! ```text
//! Transport ──create_channel──→ TransportChannel ──basic_consume──→ DeliveryStream
//!                                  declare / bind / qos / publish      next() → Inbound
//!                                                                        acker: Acknowledge
//! ```
//!
//! `peril-broker` implements them in-process. A networked AMQP client
//! plugs in by implementing the same traits and mapping its failures onto
//! [`BrokerError`]'s reply codes; `PRECONDITION_FAILED` in particular must
//! become [`BrokerError::PreconditionFailed`] for topology conflicts to be
//! reported as such.

use std::fmt;
use std::future::Future;

use peril_broker::{
    Acker, BrokerError, Channel, Connection, Consumer, Delivery, ExchangeKind, ExchangeOptions,
    FieldTable, Properties, Queue, QueueOptions,
};

use crate::ack::Acknowledge;

/// A live connection handle supplied by whoever bootstraps the process.
pub trait Transport: Clone + Send + Sync + 'static {
    type Channel: TransportChannel;

    /// Opens a fresh channel. Channels are never shared between
    /// subscriptions.
    fn create_channel(&self) -> impl Future<Output = Result<Self::Channel, BrokerError>> + Send;
}

/// One channel on a [`Transport`].
pub trait TransportChannel: Clone + fmt::Debug + Send + Sync + 'static {
    type Stream: DeliveryStream;

    fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    fn queue_declare(
        &self,
        name: &str,
        options: QueueOptions,
        arguments: FieldTable,
    ) -> impl Future<Output = Result<Queue, BrokerError>> + Send;

    fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Returns how many ready messages were dropped with the queue.
    fn queue_delete(&self, queue: &str) -> impl Future<Output = Result<usize, BrokerError>> + Send;

    fn basic_qos(&self, prefetch_count: u16) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Starts consuming `queue`. An empty tag lets the broker pick one.
    fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> impl Future<Output = Result<Self::Stream, BrokerError>> + Send;

    fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: Properties,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send;

    /// Closes the channel; unacknowledged deliveries are requeued.
    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send;
}

/// The deliveries of one consumer, in broker order.
pub trait DeliveryStream: Send + 'static {
    type Acker: Acknowledge + 'static;

    fn tag(&self) -> &str;

    fn queue(&self) -> &str;

    /// `None` once the stream can never yield again.
    fn next(&mut self) -> impl Future<Output = Option<Inbound<Self::Acker>>> + Send;
}

/// A delivery as the dispatch loop sees it.
#[derive(Debug)]
pub struct Inbound<A> {
    pub delivery_tag: u64,
    pub routing_key: String,
    pub redelivered: bool,
    /// Selects the codec; absent on messages from untagged publishers.
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub acker: A,
}

// ---------------------------------------------------------------------------
// peril-broker
// ---------------------------------------------------------------------------

impl Transport for Connection {
    type Channel = Channel;

    fn create_channel(&self) -> impl Future<Output = Result<Channel, BrokerError>> + Send {
        Connection::create_channel(self)
    }
}

impl TransportChannel for Channel {
    type Stream = Consumer;

    fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send {
        Channel::exchange_declare(self, name, kind, options)
    }

    fn queue_declare(
        &self,
        name: &str,
        options: QueueOptions,
        arguments: FieldTable,
    ) -> impl Future<Output = Result<Queue, BrokerError>> + Send {
        Channel::queue_declare(self, name, options, arguments)
    }

    fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send {
        Channel::queue_bind(self, queue, exchange, routing_key)
    }

    fn queue_delete(&self, queue: &str) -> impl Future<Output = Result<usize, BrokerError>> + Send {
        Channel::queue_delete(self, queue)
    }

    fn basic_qos(&self, prefetch_count: u16) -> impl Future<Output = Result<(), BrokerError>> + Send {
        Channel::basic_qos(self, prefetch_count)
    }

    fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> impl Future<Output = Result<Consumer, BrokerError>> + Send {
        Channel::basic_consume(self, queue, consumer_tag)
    }

    fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: Properties,
        body: Vec<u8>,
    ) -> impl Future<Output = Result<(), BrokerError>> + Send {
        Channel::basic_publish(self, exchange, routing_key, properties, body)
    }

    fn close(&self) -> impl Future<Output = Result<(), BrokerError>> + Send {
        Channel::close(self)
    }
}

impl DeliveryStream for Consumer {
    type Acker = Acker;

    fn tag(&self) -> &str {
        Consumer::tag(self)
    }

    fn queue(&self) -> &str {
        Consumer::queue(self)
    }

    async fn next(&mut self) -> Option<Inbound<Acker>> {
        let Delivery {
            delivery_tag,
            routing_key,
            redelivered,
            properties,
            data,
            acker,
            ..
        } = Consumer::next(self).await?;
        Some(Inbound {
            delivery_tag: delivery_tag.into_inner(),
            routing_key,
            redelivered,
            content_type: properties.content_type,
            body: data,
            acker,
        })
    }
}
