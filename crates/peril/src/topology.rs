//! Queue declaration and binding.
//!
//! Every subscription starts here: open a fresh channel, declare the queue
//! with the options its [`QueueDurability`] implies, and bind it to an
//! exchange. The channel is returned to the caller and never pooled.

use peril_broker::{
    BrokerError, ExchangeKind, ExchangeOptions, FieldTable, Queue, QueueOptions,
    X_DEAD_LETTER_EXCHANGE,
};
use peril_protocol::routing::{
    DEAD_LETTER_QUEUE, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_DLX, EXCHANGE_PERIL_TOPIC,
};

use crate::PerilError;
use crate::transport::{Transport, TransportChannel};

/// Lifetime class of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueDurability {
    /// Survives broker restarts, shared between consumers, dead-letters
    /// discarded messages.
    Durable,
    /// Exclusive to the declaring connection and deleted with it.
    Transient,
}

impl QueueDurability {
    fn queue_options(self) -> QueueOptions {
        match self {
            Self::Durable => QueueOptions {
                durable: true,
                exclusive: false,
                auto_delete: false,
            },
            Self::Transient => QueueOptions {
                durable: false,
                exclusive: true,
                auto_delete: true,
            },
        }
    }
}

/// Where a subscription's messages come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
    /// Binding key. May contain `*` and `#` on a topic exchange.
    pub key: String,
    pub durability: QueueDurability,
    /// Only consulted for durable queues.
    pub dead_letter_exchange: String,
}

impl Topology {
    pub fn new(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        key: impl Into<String>,
        durability: QueueDurability,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
            key: key.into(),
            durability,
            dead_letter_exchange: EXCHANGE_PERIL_DLX.to_string(),
        }
    }

    pub fn durable(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::new(exchange, queue, key, QueueDurability::Durable)
    }

    pub fn transient(
        exchange: impl Into<String>,
        queue: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::new(exchange, queue, key, QueueDurability::Transient)
    }

    /// Overrides the dead-letter exchange.
    pub fn with_dead_letter_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.dead_letter_exchange = exchange.into();
        self
    }

    fn arguments(&self) -> FieldTable {
        let mut arguments = FieldTable::new();
        if self.durability == QueueDurability::Durable {
            arguments.insert(
                X_DEAD_LETTER_EXCHANGE.to_string(),
                self.dead_letter_exchange.clone(),
            );
        }
        arguments
    }
}

/// Opens a channel, declares `topology.queue`, and binds it.
///
/// Redeclaring with identical parameters returns the existing queue.
///
/// # Errors
/// - [`PerilError::TopologyConflict`] if the queue exists with different
///   parameters.
/// - [`PerilError::Broker`] if the exchange is unknown or the connection
///   is closed.
///
/// On error the new channel is closed again, and an empty, unconsumed
/// transient queue that could not be bound is deleted. The original error
/// is returned even if that cleanup fails.
pub async fn declare_and_bind<T: Transport>(
    conn: &T,
    topology: &Topology,
) -> Result<(T::Channel, Queue), PerilError> {
    let channel = conn.create_channel().await?;
    match declare_on(&channel, topology).await {
        Ok(queue) => {
            tracing::debug!(
                queue = %queue.name,
                exchange = %topology.exchange,
                key = %topology.key,
                durability = ?topology.durability,
                "queue bound"
            );
            Ok((channel, queue))
        }
        Err(e) => {
            if let Err(close_err) = channel.close().await {
                tracing::warn!(
                    queue = %topology.queue,
                    error = %close_err,
                    "failed to close channel after declare error"
                );
            }
            Err(e)
        }
    }
}

async fn declare_on<C: TransportChannel>(
    channel: &C,
    topology: &Topology,
) -> Result<Queue, PerilError> {
    let queue = channel
        .queue_declare(
            &topology.queue,
            topology.durability.queue_options(),
            topology.arguments(),
        )
        .await
        .map_err(|e| match e {
            BrokerError::PreconditionFailed(_) => PerilError::TopologyConflict {
                queue: topology.queue.clone(),
                source: e,
            },
            other => PerilError::Broker(other),
        })?;

    if let Err(e) = channel
        .queue_bind(&queue.name, &topology.exchange, &topology.key)
        .await
    {
        // Durable queues may carry bindings other processes rely on.
        let orphaned = topology.durability == QueueDurability::Transient
            && queue.message_count == 0
            && queue.consumer_count == 0;
        if orphaned {
            if let Err(delete_err) = channel.queue_delete(&queue.name).await {
                tracing::warn!(
                    queue = %queue.name,
                    error = %delete_err,
                    "failed to delete unbound queue"
                );
            }
        }
        return Err(e.into());
    }
    Ok(queue)
}

/// Declares the game's exchanges and the dead-letter queue.
///
/// Safe to call from every process at startup.
pub async fn declare_exchanges<T: Transport>(conn: &T) -> Result<(), PerilError> {
    let channel = conn.create_channel().await?;
    let durable = ExchangeOptions::default();
    channel
        .exchange_declare(EXCHANGE_PERIL_DIRECT, ExchangeKind::Direct, durable)
        .await?;
    channel
        .exchange_declare(EXCHANGE_PERIL_TOPIC, ExchangeKind::Topic, durable)
        .await?;
    channel
        .exchange_declare(EXCHANGE_PERIL_DLX, ExchangeKind::Fanout, durable)
        .await?;
    channel
        .queue_declare(
            DEAD_LETTER_QUEUE,
            QueueDurability::Durable.queue_options(),
            FieldTable::new(),
        )
        .await?;
    channel
        .queue_bind(DEAD_LETTER_QUEUE, EXCHANGE_PERIL_DLX, "")
        .await?;
    channel.close().await?;
    tracing::info!("exchanges declared");
    Ok(())
}
