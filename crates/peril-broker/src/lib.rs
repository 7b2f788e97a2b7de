//! In-process message broker for Peril.
//!
//! Models the subset of AMQP 0-9-1 that the dispatch engine relies on:
//! connections and channels, direct/topic/fanout exchanges, queues with
//! durable/exclusive/auto-delete flags, bindings, per-channel QoS
//! (prefetch), positive and negative acknowledgments, and dead-lettering
//! of rejected messages.
//!
//! # Architecture
//!
//! ```text
//! Connection ──create_channel──→ Channel ──basic_consume──→ Consumer
//!                                   │                          │
//!                          basic_publish                 next() → Delivery
//!                                   ▼                          │
//!                    Exchange ──binding──→ Queue        Acker::ack / nack
//! ```
//!
//! Every handle ([`Connection`], [`Channel`], [`Consumer`], [`Acker`]) is a
//! thin view over one shared broker state guarded by a mutex. Waiting
//! consumers park on a [`tokio::sync::Notify`] that is signalled on every
//! state change.

mod broker;
mod channel;
mod consumer;
mod error;
mod topic;

pub use broker::Broker;
pub use channel::{Channel, Connection};
pub use consumer::{Acker, Consumer, Delivery};
pub use error::BrokerError;
pub use topic::topic_matches;

use std::collections::BTreeMap;
use std::fmt;

/// Queue argument naming the exchange that receives rejected messages.
pub const X_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Header set on dead-lettered messages: the queue they were rejected from.
pub const X_FIRST_DEATH_QUEUE: &str = "x-first-death-queue";

/// Header set on dead-lettered messages: why they were dead-lettered.
pub const X_FIRST_DEATH_REASON: &str = "x-first-death-reason";

/// String-valued argument/header table.
pub type FieldTable = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of one broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifier of one channel. Unique across the whole broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Creates a new `ChannelId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chan-{}", self.0)
    }
}

/// Per-channel delivery tag. Monotonically increasing from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryTag(u64);

impl DeliveryTag {
    /// Creates a new `DeliveryTag` from a raw `u64`.
    pub fn new(tag: u64) -> Self {
        Self(tag)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// How an exchange matches routing keys against its bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Binding key must equal the routing key.
    Direct,
    /// Dot-separated patterns: `*` matches one word, `#` zero or more.
    Topic,
    /// Every bound queue receives every message.
    Fanout,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Topic => write!(f, "topic"),
            Self::Fanout => write!(f, "fanout"),
        }
    }
}

/// Flags for `exchange.declare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeOptions {
    /// Survives [`Broker::restart`].
    pub durable: bool,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self { durable: true }
    }
}

/// Flags for `queue.declare`.
///
/// Redeclaring an existing queue succeeds only when every flag and every
/// argument is identical to the original declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueOptions {
    /// Survives [`Broker::restart`].
    pub durable: bool,
    /// Only the declaring connection may use the queue; it is deleted
    /// when that connection closes.
    pub exclusive: bool,
    /// Deleted once its last consumer goes away.
    pub auto_delete: bool,
}

/// Metadata carried next to a message body.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Properties {
    /// MIME type of the body, e.g. `application/json`.
    pub content_type: Option<String>,
    /// Free-form headers. The broker adds `x-first-death-*` entries when
    /// it dead-letters a message.
    pub headers: FieldTable,
}

impl Properties {
    /// Properties with only a content type set.
    pub fn with_content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            headers: FieldTable::new(),
        }
    }
}

/// Result of a successful `queue.declare`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queue {
    /// Queue name (server-generated when declared with an empty name).
    pub name: String,
    /// Messages ready for delivery at declaration time.
    pub message_count: usize,
    /// Active consumers at declaration time.
    pub consumer_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_display() {
        assert_eq!(ConnectionId::new(7).to_string(), "conn-7");
        assert_eq!(ChannelId::new(3).to_string(), "chan-3");
        assert_eq!(DeliveryTag::new(12).to_string(), "#12");
    }

    #[test]
    fn test_ids_round_trip_inner_value() {
        assert_eq!(ConnectionId::new(42).into_inner(), 42);
        assert_eq!(ChannelId::new(42).into_inner(), 42);
        assert_eq!(DeliveryTag::new(42).into_inner(), 42);
    }

    #[test]
    fn test_exchange_kind_display() {
        assert_eq!(ExchangeKind::Topic.to_string(), "topic");
        assert_eq!(ExchangeKind::Fanout.to_string(), "fanout");
    }

    #[test]
    fn test_default_queue_options_are_all_off() {
        let opts = QueueOptions::default();
        assert!(!opts.durable && !opts.exclusive && !opts.auto_delete);
    }

    #[test]
    fn test_properties_with_content_type() {
        let props = Properties::with_content_type("application/json");
        assert_eq!(props.content_type.as_deref(), Some("application/json"));
        assert!(props.headers.is_empty());
    }
}
