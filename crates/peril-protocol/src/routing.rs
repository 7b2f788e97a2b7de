//! Exchange names and routing keys.
//!
//! Topic keys are dot-segmented: `<prefix>.<username>`. Publishers use
//! [`keyed`], subscribers bind with [`wildcard`]. Building keys any other
//! way risks bindings that never match.

/// Direct exchange for broadcast-style state (pause/resume).
pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";

/// Topic exchange for routed gameplay events.
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";

/// Fanout exchange receiving every discarded message from durable queues.
pub const EXCHANGE_PERIL_DLX: &str = "peril_dlx";

/// Durable queue bound to [`EXCHANGE_PERIL_DLX`].
pub const DEAD_LETTER_QUEUE: &str = "peril_dlq";

/// Routing key for [`PlayingState`](crate::PlayingState) on the direct exchange.
pub const PAUSE_KEY: &str = "pause";

pub const ARMY_MOVES_PREFIX: &str = "army_moves";

pub const WAR_RECOGNITIONS_PREFIX: &str = "war";

pub const GAME_LOG_SLUG: &str = "game_logs";

/// `<prefix>.<username>`, the key a player publishes under.
///
/// ```rust
/// use peril_protocol::routing::{keyed, ARMY_MOVES_PREFIX};
///
/// assert_eq!(keyed(ARMY_MOVES_PREFIX, "alice"), "army_moves.alice");
/// ```
pub fn keyed(prefix: &str, username: &str) -> String {
    format!("{prefix}.{username}")
}

/// `<prefix>.*`, matching every player's key under `prefix`.
pub fn wildcard(prefix: &str) -> String {
    format!("{prefix}.*")
}
