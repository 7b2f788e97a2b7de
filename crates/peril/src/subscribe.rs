//! The dispatch loop.
//!
//! [`subscribe`] binds a queue and spawns one task that owns its consumer.
//! The task handles deliveries strictly one at a time:
//!
//! ```text
//! next() ──→ decode ──ok──→ handler ──→ Disposition ──→ ack::apply
//!              │
//!              └──err──→ Discard
//! ```
//!
//! A delivery's content-type tag picks the codec it is decoded with. The
//! codec a subscription is created with is only used for deliveries that
//! carry no tag.
//!
//! Separate subscriptions run in separate tasks and make progress
//! independently. The loop ends when the consumer stream ends: the
//! connection or channel closed, the queue was deleted, or the
//! subscription was cancelled. It does not reconnect.

use std::future::Future;
use std::time::Duration;

use peril_protocol::{Codec, Envelope, JsonCodec, MsgPackCodec, ProtocolError};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::ack::{self, Disposition};
use crate::topology::{Topology, declare_and_bind};
use crate::transport::{DeliveryStream, Inbound, Transport, TransportChannel};
use crate::{PerilError, SubscribeOptions};

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Processes one decoded message and decides how to settle it.
///
/// Any `Fn(T) -> impl Future<Output = Disposition>` closure is a handler.
pub trait Handler<T>: Send + Sync + 'static {
    fn handle(&self, message: T) -> impl Future<Output = Disposition> + Send;
}

impl<T, F, Fut> Handler<T> for F
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Disposition> + Send,
{
    fn handle(&self, message: T) -> impl Future<Output = Disposition> + Send {
        self(message)
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A running dispatch loop.
///
/// Dropping the handle does not stop the loop; use
/// [`cancel`](Self::cancel) or close the connection.
#[derive(Debug)]
pub struct Subscription<Ch> {
    queue: String,
    consumer_tag: String,
    channel: Ch,
    task: JoinHandle<()>,
}

impl<Ch: TransportChannel> Subscription<Ch> {
    /// Name of the bound queue.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    /// `true` once the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Closes the subscription's channel and waits for the loop to exit.
    ///
    /// A delivery being handled when this is called is requeued.
    pub async fn cancel(self) -> Result<(), PerilError> {
        self.channel.close().await?;
        self.join().await;
        Ok(())
    }

    /// Waits for the loop to exit on its own.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(queue = %self.queue, error = %e, "dispatch task failed");
        }
    }
}

// ---------------------------------------------------------------------------
// subscribe
// ---------------------------------------------------------------------------

/// Binds `topology` and starts a dispatch loop feeding `handler`.
///
/// # Errors
/// Binding and QoS failures are returned before any task is spawned.
pub async fn subscribe<T, C, H, Tr>(
    conn: &Tr,
    topology: &Topology,
    codec: C,
    options: SubscribeOptions,
    handler: H,
) -> Result<Subscription<Tr::Channel>, PerilError>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T>,
    Tr: Transport,
{
    let (channel, queue) = declare_and_bind(conn, topology).await?;
    channel.basic_qos(options.prefetch).await?;
    let consumer = channel.basic_consume(&queue.name, "").await?;
    let consumer_tag = consumer.tag().to_string();

    tracing::info!(
        queue = %queue.name,
        key = %topology.key,
        prefetch = options.prefetch,
        "subscribed"
    );

    let task = tokio::spawn(dispatch::<T, C, H, _>(
        consumer,
        codec,
        handler,
        options.handler_timeout,
    ));

    Ok(Subscription {
        queue: queue.name,
        consumer_tag,
        channel,
        task,
    })
}

/// [`subscribe`] with [`JsonCodec`].
pub async fn subscribe_json<T, H, Tr>(
    conn: &Tr,
    topology: &Topology,
    options: SubscribeOptions,
    handler: H,
) -> Result<Subscription<Tr::Channel>, PerilError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
    Tr: Transport,
{
    subscribe(conn, topology, JsonCodec, options, handler).await
}

/// [`subscribe`] with [`MsgPackCodec`].
pub async fn subscribe_msgpack<T, H, Tr>(
    conn: &Tr,
    topology: &Topology,
    options: SubscribeOptions,
    handler: H,
) -> Result<Subscription<Tr::Channel>, PerilError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
    Tr: Transport,
{
    subscribe(conn, topology, MsgPackCodec, options, handler).await
}

async fn dispatch<T, C, H, S>(mut stream: S, codec: C, handler: H, handler_timeout: Option<Duration>)
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T>,
    S: DeliveryStream,
{
    while let Some(delivery) = stream.next().await {
        let Inbound {
            delivery_tag,
            routing_key,
            redelivered,
            content_type,
            body,
            acker,
        } = delivery;

        let disposition = match decode::<T, C>(&codec, content_type, body) {
            Ok(message) => run_handler(&handler, message, handler_timeout).await,
            Err(e) => {
                tracing::warn!(
                    queue = %stream.queue(),
                    delivery_tag,
                    %routing_key,
                    error = %e,
                    "undecodable delivery discarded"
                );
                Disposition::Discard
            }
        };

        tracing::debug!(
            queue = %stream.queue(),
            delivery_tag,
            %routing_key,
            redelivered,
            %disposition,
            "delivery handled"
        );
        if disposition == Disposition::RetryLater {
            tracing::warn!(queue = %stream.queue(), delivery_tag, "delivery requeued");
        }

        if let Err(e) = ack::apply(acker, disposition).await {
            // The channel is gone; the broker has already requeued the
            // delivery and the next `next()` ends the loop.
            tracing::warn!(
                queue = %stream.queue(),
                delivery_tag,
                error = %e,
                "acknowledgment failed"
            );
        }

        // Give the other consumers of this queue a turn at a requeued
        // message before pulling again.
        if disposition == Disposition::RetryLater {
            tokio::task::yield_now().await;
        }
    }
    tracing::info!(queue = %stream.queue(), "delivery stream closed");
}

/// Decodes with the codec the tag names, or with `fallback` when the
/// delivery is untagged.
fn decode<T, C>(fallback: &C, content_type: Option<String>, body: Vec<u8>) -> Result<T, ProtocolError>
where
    T: DeserializeOwned,
    C: Codec,
{
    match content_type {
        Some(content_type) => Envelope::new(content_type, body).decode(),
        None => fallback.decode(&body),
    }
}

async fn run_handler<T, H: Handler<T>>(
    handler: &H,
    message: T,
    handler_timeout: Option<Duration>,
) -> Disposition {
    let Some(limit) = handler_timeout else {
        return handler.handle(message).await;
    };
    match tokio::time::timeout(limit, handler.handle(message)).await {
        Ok(disposition) => disposition,
        Err(_) => {
            tracing::warn!(timeout = ?limit, "handler timed out");
            Disposition::RetryLater
        }
    }
}
