//! Shared broker state and the [`Broker`] entry point.
//!
//! All mutation happens inside [`BrokerState`] while the mutex is held.
//! No lock is ever held across an `.await`: handles take the lock, do
//! their bookkeeping synchronously, release it, and then wake parked
//! consumers through the shared [`Notify`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;
use tokio::sync::Notify;

use crate::topic::topic_matches;
use crate::{
    BrokerError, ChannelId, Connection, ConnectionId, DeliveryTag,
    ExchangeKind, ExchangeOptions, FieldTable, Properties, Queue,
    QueueOptions, X_DEAD_LETTER_EXCHANGE, X_FIRST_DEATH_QUEUE,
    X_FIRST_DEATH_REASON,
};

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// An in-process message broker.
///
/// Cheap to clone; all clones refer to the same exchanges and queues.
///
/// ```rust,ignore
/// let broker = Broker::new();
/// let conn = broker.connect().await?;
/// let ch = conn.create_channel().await?;
/// ch.exchange_declare("peril_topic", ExchangeKind::Topic, ExchangeOptions::default())
///     .await?;
/// ```
#[derive(Clone, Default)]
pub struct Broker {
    shared: Arc<Shared>,
}

impl Broker {
    /// Creates an empty broker with no exchanges or queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new connection.
    pub async fn connect(&self) -> Result<Connection, BrokerError> {
        let id = self.shared.mutate(|state| state.open_connection());
        tracing::debug!(%id, "broker connection opened");
        Ok(Connection::new(id, Arc::clone(&self.shared)))
    }

    /// Simulates a broker restart.
    ///
    /// Every connection is closed. Durable exchanges and durable queues
    /// (with their ready messages) survive; everything else is dropped.
    pub fn restart(&self) {
        self.shared.mutate(|state| state.restart());
        tracing::info!("broker restarted");
    }

    /// Names of all existing queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let state = self.shared.lock();
        let mut names: Vec<String> = state.queues.keys().cloned().collect();
        names.sort();
        names
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct Shared {
    state: Mutex<BrokerState>,
    pub(crate) notify: Notify,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` under the lock, then wakes every parked consumer.
    pub(crate) fn mutate<R>(
        &self,
        f: impl FnOnce(&mut BrokerState) -> R,
    ) -> R {
        let result = {
            let mut state = self.lock();
            f(&mut state)
        };
        self.notify.notify_waiters();
        result
    }
}

/// A message as stored in a queue.
#[derive(Debug, Clone)]
pub(crate) struct Message {
    pub(crate) exchange: String,
    pub(crate) routing_key: String,
    pub(crate) properties: Properties,
    pub(crate) body: Vec<u8>,
    pub(crate) redelivered: bool,
    /// Consumers that requeued this message since it was last routed.
    pub(crate) rejected_by: Vec<ConsumerKey>,
}

/// A consumer is identified by its channel and tag.
pub(crate) type ConsumerKey = (ChannelId, String);

/// A message handed to a consumer, now outstanding on a channel.
pub(crate) struct Delivered {
    pub(crate) tag: DeliveryTag,
    pub(crate) message: Message,
}

/// Outcome of a consumer polling its queue.
pub(crate) enum Pull {
    Ready(Delivered),
    /// Nothing to deliver right now (queue empty or prefetch exhausted).
    Empty,
    /// The consumer can never receive again.
    Closed,
}

struct ExchangeState {
    kind: ExchangeKind,
    options: ExchangeOptions,
    /// `(queue, binding key)` pairs.
    bindings: Vec<(String, String)>,
}

struct QueueState {
    options: QueueOptions,
    arguments: FieldTable,
    owner: Option<ConnectionId>,
    ready: VecDeque<Message>,
    consumers: usize,
    had_consumer: bool,
}

struct Unacked {
    queue: String,
    /// `None` for `basic.get`.
    consumer: Option<String>,
    message: Message,
}

struct ChannelState {
    connection: ConnectionId,
    /// 0 means unlimited.
    prefetch: u16,
    next_tag: u64,
    unacked: BTreeMap<DeliveryTag, Unacked>,
    /// consumer tag → queue name
    consumers: HashMap<String, String>,
}

#[derive(Default)]
pub(crate) struct BrokerState {
    exchanges: HashMap<String, ExchangeState>,
    queues: HashMap<String, QueueState>,
    /// Open connections and the channels they own.
    connections: HashMap<ConnectionId, HashSet<ChannelId>>,
    channels: HashMap<ChannelId, ChannelState>,
    next_connection: u64,
    next_channel: u64,
}

impl BrokerState {
    // -- Connections and channels --

    fn open_connection(&mut self) -> ConnectionId {
        self.next_connection += 1;
        let id = ConnectionId::new(self.next_connection);
        self.connections.insert(id, HashSet::new());
        id
    }

    pub(crate) fn connection_open(&self, conn: ConnectionId) -> bool {
        self.connections.contains_key(&conn)
    }

    pub(crate) fn close_connection(&mut self, conn: ConnectionId) -> bool {
        let Some(channels) = self.connections.remove(&conn) else {
            return false;
        };
        for ch in channels {
            self.close_channel(ch);
        }

        let exclusive: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, q)| q.owner == Some(conn))
            .map(|(name, _)| name.clone())
            .collect();
        for name in exclusive {
            tracing::debug!(queue = %name, %conn, "deleting exclusive queue");
            self.delete_queue(&name);
        }
        true
    }

    pub(crate) fn open_channel(
        &mut self,
        conn: ConnectionId,
    ) -> Result<ChannelId, BrokerError> {
        let channels = self
            .connections
            .get_mut(&conn)
            .ok_or(BrokerError::ConnectionClosed)?;
        self.next_channel += 1;
        let id = ChannelId::new(self.next_channel);
        channels.insert(id);
        self.channels.insert(
            id,
            ChannelState {
                connection: conn,
                prefetch: 0,
                next_tag: 0,
                unacked: BTreeMap::new(),
                consumers: HashMap::new(),
            },
        );
        Ok(id)
    }

    pub(crate) fn channel_open(&self, ch: ChannelId) -> bool {
        self.channels.contains_key(&ch)
    }

    /// Closes a channel: unacked deliveries go back to the head of their
    /// queues and its consumers are cancelled.
    pub(crate) fn close_channel(&mut self, ch: ChannelId) -> bool {
        let Some(channel) = self.channels.remove(&ch) else {
            return false;
        };
        if let Some(owned) = self.connections.get_mut(&channel.connection) {
            owned.remove(&ch);
        }
        // Reverse tag order so the oldest delivery ends up first.
        for (_, unacked) in channel.unacked.into_iter().rev() {
            self.requeue(&unacked.queue, unacked.message);
        }
        for (_, queue) in channel.consumers {
            self.release_consumer(&queue);
        }
        true
    }

    fn channel_connection(
        &self,
        ch: ChannelId,
    ) -> Result<ConnectionId, BrokerError> {
        self.channels
            .get(&ch)
            .map(|c| c.connection)
            .ok_or(BrokerError::ChannelClosed(ch))
    }

    pub(crate) fn set_prefetch(
        &mut self,
        ch: ChannelId,
        prefetch: u16,
    ) -> Result<(), BrokerError> {
        let channel = self
            .channels
            .get_mut(&ch)
            .ok_or(BrokerError::ChannelClosed(ch))?;
        channel.prefetch = prefetch;
        Ok(())
    }

    // -- Declarations --

    pub(crate) fn declare_exchange(
        &mut self,
        ch: ChannelId,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<(), BrokerError> {
        self.channel_connection(ch)?;
        if let Some(existing) = self.exchanges.get(name) {
            if existing.kind != kind || existing.options != options {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent declaration for exchange '{name}': \
                     existing {} durable={}, requested {kind} durable={}",
                    existing.kind, existing.options.durable, options.durable
                )));
            }
            return Ok(());
        }
        self.exchanges.insert(
            name.to_string(),
            ExchangeState {
                kind,
                options,
                bindings: Vec::new(),
            },
        );
        tracing::debug!(exchange = name, %kind, "exchange declared");
        Ok(())
    }

    pub(crate) fn declare_queue(
        &mut self,
        ch: ChannelId,
        name: &str,
        options: QueueOptions,
        arguments: FieldTable,
    ) -> Result<Queue, BrokerError> {
        let conn = self.channel_connection(ch)?;
        let name = if name.is_empty() {
            format!("amq.gen-{}", random_hex())
        } else {
            name.to_string()
        };

        if let Some(existing) = self.queues.get(&name) {
            if existing.owner.is_some_and(|owner| owner != conn) {
                return Err(BrokerError::ResourceLocked(name));
            }
            if existing.options != options || existing.arguments != arguments
            {
                return Err(BrokerError::PreconditionFailed(format!(
                    "inequivalent declaration for queue '{name}': \
                     existing {:?} {:?}, requested {options:?} {arguments:?}",
                    existing.options, existing.arguments
                )));
            }
            return Ok(Queue {
                message_count: existing.ready.len(),
                consumer_count: existing.consumers,
                name,
            });
        }

        self.queues.insert(
            name.clone(),
            QueueState {
                options,
                arguments,
                owner: options.exclusive.then_some(conn),
                ready: VecDeque::new(),
                consumers: 0,
                had_consumer: false,
            },
        );
        tracing::debug!(queue = %name, ?options, "queue declared");
        Ok(Queue {
            name,
            message_count: 0,
            consumer_count: 0,
        })
    }

    pub(crate) fn bind_queue(
        &mut self,
        ch: ChannelId,
        queue: &str,
        exchange: &str,
        key: &str,
    ) -> Result<(), BrokerError> {
        let conn = self.channel_connection(ch)?;
        self.accessible_queue(conn, queue)?;
        let exchange_state = self
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::ExchangeNotFound(exchange.to_string()))?;
        let binding = (queue.to_string(), key.to_string());
        if !exchange_state.bindings.contains(&binding) {
            exchange_state.bindings.push(binding);
            tracing::debug!(queue, exchange, key, "queue bound");
        }
        Ok(())
    }

    fn accessible_queue(
        &mut self,
        conn: ConnectionId,
        name: &str,
    ) -> Result<&mut QueueState, BrokerError> {
        let queue = self
            .queues
            .get_mut(name)
            .ok_or_else(|| BrokerError::QueueNotFound(name.to_string()))?;
        if queue.owner.is_some_and(|owner| owner != conn) {
            return Err(BrokerError::ResourceLocked(name.to_string()));
        }
        Ok(queue)
    }

    pub(crate) fn message_count(
        &mut self,
        ch: ChannelId,
        queue: &str,
    ) -> Result<usize, BrokerError> {
        let conn = self.channel_connection(ch)?;
        Ok(self.accessible_queue(conn, queue)?.ready.len())
    }

    pub(crate) fn purge_queue(
        &mut self,
        ch: ChannelId,
        queue: &str,
    ) -> Result<usize, BrokerError> {
        let conn = self.channel_connection(ch)?;
        let queue = self.accessible_queue(conn, queue)?;
        let purged = queue.ready.len();
        queue.ready.clear();
        Ok(purged)
    }

    pub(crate) fn remove_queue(
        &mut self,
        ch: ChannelId,
        queue: &str,
    ) -> Result<usize, BrokerError> {
        let conn = self.channel_connection(ch)?;
        let ready = self.accessible_queue(conn, queue)?.ready.len();
        self.delete_queue(queue);
        tracing::debug!(queue, ready, "queue deleted");
        Ok(ready)
    }

    fn delete_queue(&mut self, name: &str) {
        if self.queues.remove(name).is_none() {
            return;
        }
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|(queue, _)| queue != name);
        }
        for channel in self.channels.values_mut() {
            channel.consumers.retain(|_, queue| queue != name);
        }
    }

    // -- Publishing and routing --

    pub(crate) fn publish(
        &mut self,
        ch: ChannelId,
        exchange: &str,
        routing_key: &str,
        properties: Properties,
        body: Vec<u8>,
    ) -> Result<usize, BrokerError> {
        self.channel_connection(ch)?;
        let message = Message {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            properties,
            body,
            redelivered: false,
            rejected_by: Vec::new(),
        };
        self.route(exchange, routing_key, message)
    }

    /// Delivers `message` to every queue bound to `exchange` under a
    /// matching key. The empty exchange name is the default exchange,
    /// which routes straight to the queue named by the routing key.
    /// Returns how many queues received a copy.
    fn route(
        &mut self,
        exchange: &str,
        routing_key: &str,
        message: Message,
    ) -> Result<usize, BrokerError> {
        let targets: BTreeSet<String> = if exchange.is_empty() {
            self.queues
                .contains_key(routing_key)
                .then(|| routing_key.to_string())
                .into_iter()
                .collect()
        } else {
            let exchange_state = self.exchanges.get(exchange).ok_or_else(
                || BrokerError::ExchangeNotFound(exchange.to_string()),
            )?;
            exchange_state
                .bindings
                .iter()
                .filter(|(_, key)| match exchange_state.kind {
                    ExchangeKind::Direct => key == routing_key,
                    ExchangeKind::Topic => topic_matches(key, routing_key),
                    ExchangeKind::Fanout => true,
                })
                .map(|(queue, _)| queue.clone())
                .collect()
        };

        if targets.is_empty() {
            tracing::trace!(exchange, routing_key, "message unroutable, dropped");
        }

        let mut routed = 0;
        for name in &targets {
            if let Some(queue) = self.queues.get_mut(name) {
                queue.ready.push_back(message.clone());
                routed += 1;
            }
        }
        Ok(routed)
    }

    // -- Consuming --

    pub(crate) fn consume(
        &mut self,
        ch: ChannelId,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<String, BrokerError> {
        let conn = self.channel_connection(ch)?;
        let tag = if consumer_tag.is_empty() {
            format!("ctag-{}", random_hex())
        } else {
            consumer_tag.to_string()
        };
        if self
            .channels
            .get(&ch)
            .is_some_and(|c| c.consumers.contains_key(&tag))
        {
            return Err(BrokerError::PreconditionFailed(format!(
                "consumer tag '{tag}' already in use on {ch}"
            )));
        }

        let queue_state = self.accessible_queue(conn, queue)?;
        queue_state.consumers += 1;
        queue_state.had_consumer = true;

        if let Some(channel) = self.channels.get_mut(&ch) {
            channel.consumers.insert(tag.clone(), queue.to_string());
        }
        Ok(tag)
    }

    pub(crate) fn cancel(&mut self, ch: ChannelId, consumer_tag: &str) {
        let queue = self
            .channels
            .get_mut(&ch)
            .and_then(|c| c.consumers.remove(consumer_tag));
        if let Some(queue) = queue {
            self.release_consumer(&queue);
        }
    }

    fn release_consumer(&mut self, name: &str) {
        let Some(queue) = self.queues.get_mut(name) else {
            return;
        };
        queue.consumers = queue.consumers.saturating_sub(1);
        if queue.options.auto_delete && queue.had_consumer && queue.consumers == 0
        {
            tracing::debug!(queue = name, "auto-deleting queue");
            self.delete_queue(name);
        }
    }

    /// Hands the next ready message to `consumer_tag`, honouring the
    /// channel's prefetch limit.
    ///
    /// A message this consumer requeued is skipped while another consumer
    /// of the queue has not rejected it yet, so a redelivery rotates to the
    /// next consumer instead of bouncing back to the one that refused it.
    pub(crate) fn pull(&mut self, ch: ChannelId, consumer_tag: &str) -> Pull {
        let Some(queue_name) = self
            .channels
            .get(&ch)
            .and_then(|c| c.consumers.get(consumer_tag))
            .cloned()
        else {
            return Pull::Closed;
        };
        let live = self.consumers_of(&queue_name);
        let me = (ch, consumer_tag.to_string());

        let (Some(channel), Some(queue)) =
            (self.channels.get_mut(&ch), self.queues.get_mut(&queue_name))
        else {
            return Pull::Closed;
        };
        if channel.prefetch > 0
            && channel.unacked.len() >= usize::from(channel.prefetch)
        {
            return Pull::Empty;
        }
        let eligible = queue.ready.iter().position(|message| {
            !message.rejected_by.contains(&me)
                || live.iter().all(|c| message.rejected_by.contains(c))
        });
        let Some(message) = eligible.and_then(|pos| queue.ready.remove(pos))
        else {
            return Pull::Empty;
        };

        channel.next_tag += 1;
        let tag = DeliveryTag::new(channel.next_tag);
        channel.unacked.insert(
            tag,
            Unacked {
                queue: queue_name,
                consumer: Some(consumer_tag.to_string()),
                message: message.clone(),
            },
        );
        Pull::Ready(Delivered { tag, message })
    }

    fn consumers_of(&self, queue: &str) -> Vec<ConsumerKey> {
        self.channels
            .iter()
            .flat_map(|(id, channel)| {
                channel
                    .consumers
                    .iter()
                    .filter(|(_, q)| q.as_str() == queue)
                    .map(move |(tag, _)| (*id, tag.clone()))
            })
            .collect()
    }

    /// `basic.get`: fetch one message without a consumer. Ignores prefetch.
    pub(crate) fn get(
        &mut self,
        ch: ChannelId,
        queue: &str,
    ) -> Result<Option<Delivered>, BrokerError> {
        let conn = self.channel_connection(ch)?;
        let Some(message) = self.accessible_queue(conn, queue)?.ready.pop_front()
        else {
            return Ok(None);
        };
        let channel = self
            .channels
            .get_mut(&ch)
            .ok_or(BrokerError::ChannelClosed(ch))?;
        channel.next_tag += 1;
        let tag = DeliveryTag::new(channel.next_tag);
        channel.unacked.insert(
            tag,
            Unacked {
                queue: queue.to_string(),
                consumer: None,
                message: message.clone(),
            },
        );
        Ok(Some(Delivered { tag, message }))
    }

    // -- Acknowledgments --

    fn take_unacked(
        &mut self,
        ch: ChannelId,
        tag: DeliveryTag,
    ) -> Result<Unacked, BrokerError> {
        self.channels
            .get_mut(&ch)
            .ok_or(BrokerError::ChannelClosed(ch))?
            .unacked
            .remove(&tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag))
    }

    pub(crate) fn ack(
        &mut self,
        ch: ChannelId,
        tag: DeliveryTag,
    ) -> Result<(), BrokerError> {
        self.take_unacked(ch, tag).map(|_| ())
    }

    pub(crate) fn reject(
        &mut self,
        ch: ChannelId,
        tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        let Unacked {
            queue,
            consumer,
            mut message,
        } = self.take_unacked(ch, tag)?;
        if requeue {
            if let Some(consumer) = consumer {
                let key = (ch, consumer);
                if !message.rejected_by.contains(&key) {
                    message.rejected_by.push(key);
                }
            }
            self.requeue(&queue, message);
        } else {
            self.dead_letter(&queue, message);
        }
        Ok(())
    }

    fn requeue(&mut self, queue: &str, mut message: Message) {
        message.redelivered = true;
        match self.queues.get_mut(queue) {
            Some(q) => q.ready.push_front(message),
            None => {
                tracing::debug!(queue, "requeue target gone, message dropped");
            }
        }
    }

    /// Republishes a rejected message to its queue's dead-letter exchange,
    /// keeping the original routing key.
    fn dead_letter(&mut self, queue: &str, mut message: Message) {
        let dlx = self
            .queues
            .get(queue)
            .and_then(|q| q.arguments.get(X_DEAD_LETTER_EXCHANGE))
            .cloned();
        let Some(dlx) = dlx else {
            tracing::debug!(queue, "rejected message discarded (no dead-letter exchange)");
            return;
        };

        let headers = &mut message.properties.headers;
        headers
            .entry(X_FIRST_DEATH_QUEUE.to_string())
            .or_insert_with(|| queue.to_string());
        headers
            .entry(X_FIRST_DEATH_REASON.to_string())
            .or_insert_with(|| "rejected".to_string());
        message.exchange = dlx.clone();
        message.redelivered = false;
        message.rejected_by.clear();

        let routing_key = message.routing_key.clone();
        match self.route(&dlx, &routing_key, message) {
            Ok(0) => tracing::warn!(queue, dlx = %dlx, "dead-lettered message unroutable"),
            Ok(_) => tracing::debug!(queue, dlx = %dlx, "message dead-lettered"),
            Err(e) => tracing::warn!(queue, error = %e, "dead-letter exchange missing"),
        }
    }

    // -- Restart --

    fn restart(&mut self) {
        let conns: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for conn in conns {
            self.close_connection(conn);
        }
        self.queues.retain(|_, q| q.options.durable);
        self.exchanges.retain(|_, e| e.options.durable);
        for queue in self.queues.values_mut() {
            queue.consumers = 0;
            queue.had_consumer = false;
        }
        let queues = &self.queues;
        for exchange in self.exchanges.values_mut() {
            exchange.bindings.retain(|(q, _)| queues.contains_key(q));
        }
    }
}

/// 16 lowercase hex characters of randomness.
fn random_hex() -> String {
    let bytes: [u8; 8] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_channel() -> (BrokerState, ChannelId) {
        let mut state = BrokerState::default();
        let conn = state.open_connection();
        let ch = state.open_channel(conn).expect("connection is open");
        (state, ch)
    }

    #[test]
    fn test_generated_queue_names_are_unique() {
        let (mut state, ch) = state_with_channel();
        let a = state
            .declare_queue(ch, "", QueueOptions::default(), FieldTable::new())
            .unwrap();
        let b = state
            .declare_queue(ch, "", QueueOptions::default(), FieldTable::new())
            .unwrap();
        assert!(a.name.starts_with("amq.gen-"));
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn test_default_exchange_routes_by_queue_name() {
        let (mut state, ch) = state_with_channel();
        state
            .declare_queue(ch, "direct_q", QueueOptions::default(), FieldTable::new())
            .unwrap();
        let routed = state
            .publish(ch, "", "direct_q", Properties::default(), b"x".to_vec())
            .unwrap();
        assert_eq!(routed, 1);
        assert_eq!(state.message_count(ch, "direct_q").unwrap(), 1);
    }

    #[test]
    fn test_closed_channel_rejects_operations() {
        let (mut state, ch) = state_with_channel();
        assert!(state.close_channel(ch));
        assert!(matches!(
            state.set_prefetch(ch, 1),
            Err(BrokerError::ChannelClosed(_))
        ));
        assert!(!state.close_channel(ch));
    }

    #[test]
    fn test_random_hex_length() {
        assert_eq!(random_hex().len(), 16);
    }
}
