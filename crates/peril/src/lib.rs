//! # Peril
//!
//! Typed publish/subscribe with at-least-once delivery for the Peril
//! strategy game.
//!
//! ```text
//! publish ──→ exchange ──key──→ queue ──→ dispatch loop ──→ Codec::decode
//!                                             │
//!                                  Handler ──→ Disposition ──→ ack / nack
//! ```
//!
//! - [`transport`] is the seam to the broker. Every engine API is generic
//!   over [`Transport`]; `peril-broker`'s in-process [`Connection`](peril_broker::Connection)
//!   is the default implementation.
//! - [`topology`] declares and binds queues.
//! - [`publish`](crate::publish()) encodes and sends one value.
//! - [`subscribe`](crate::subscribe()) runs one dispatch loop per queue.
//! - [`ack`] maps a [`Disposition`] to exactly one broker call.
//! - [`GameClient`] and [`GameServer`] wire the game's queues together.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use peril::prelude::*;
//!
//! # async fn run() -> Result<(), PerilError> {
//! let broker = Broker::new();
//! let conn = broker.connect().await?;
//! declare_exchanges(&conn).await?;
//!
//! let config = PerilConfig::default();
//! let server = GameServer::connect(&conn, &config).await?;
//! let _logs = server.subscribe_logs(TracingLogHandler).await?;
//!
//! let alice = GameClient::connect(&conn, "alice", &config).await?;
//! alice.spawn("europe", "cavalry").await?;
//! # Ok(())
//! # }
//! ```

pub mod ack;
mod client;
mod config;
mod error;
mod publish;
mod server;
mod subscribe;
pub mod telemetry;
pub mod topology;
pub mod transport;

pub use ack::{Acknowledge, Disposition};
pub use client::{GameClient, MoveHandler, PauseHandler, SharedState, WarHandler};
pub use config::{DEFAULT_PREFETCH, PerilConfig, PerilConfigBuilder, SubscribeOptions};
pub use error::PerilError;
pub use publish::{publish, publish_json, publish_msgpack};
pub use server::{GameServer, TracingLogHandler};
pub use subscribe::{Handler, Subscription, subscribe, subscribe_json, subscribe_msgpack};
pub use topology::{QueueDurability, Topology, declare_and_bind, declare_exchanges};
pub use transport::{DeliveryStream, Inbound, Transport, TransportChannel};

/// Re-exports for convenient glob imports.
pub mod prelude {
    pub use peril_broker::{Broker, Connection};
    pub use peril_gamelogic::{
        ArmyMove, GameError, GameState, Location, MoveOutcome, Player, RecognitionOfWar, Unit,
        UnitId, UnitRank, WarOutcome,
    };
    pub use peril_protocol::{Codec, GameLog, JsonCodec, MsgPackCodec, PlayingState};

    pub use crate::{
        Disposition, GameClient, GameServer, Handler, PerilConfig, PerilError, QueueDurability,
        Subscription, Topology, TracingLogHandler, Transport, TransportChannel, declare_and_bind,
        declare_exchanges, publish, publish_json, publish_msgpack, subscribe, subscribe_json,
        subscribe_msgpack,
    };
}
