//! Unified error type for the Peril engine.

use peril_broker::BrokerError;
use peril_gamelogic::GameError;
use peril_protocol::ProtocolError;

/// Top-level error that wraps all crate-specific errors.
///
/// Broker errors are never retried by the engine: they surface to
/// whoever made the call.
#[derive(Debug, thiserror::Error)]
pub enum PerilError {
    /// Connection or channel failure, unknown exchange, and the like.
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// A value could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A player command was rejected.
    #[error(transparent)]
    Game(#[from] GameError),

    /// The queue already exists with different parameters. It was left
    /// as it was.
    #[error("queue '{queue}' already exists with different parameters")]
    TopologyConflict {
        queue: String,
        #[source]
        source: BrokerError,
    },
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn test_from_broker_error() {
        let err: PerilError = BrokerError::ConnectionClosed.into();
        assert!(matches!(err, PerilError::Broker(_)));
        assert_eq!(err.to_string(), "connection closed");
    }

    #[test]
    fn test_from_game_error() {
        let err: PerilError = GameError::Paused.into();
        assert!(matches!(err, PerilError::Game(GameError::Paused)));
    }

    #[test]
    fn test_topology_conflict_keeps_source() {
        let err = PerilError::TopologyConflict {
            queue: "war".into(),
            source: BrokerError::PreconditionFailed("durable differs".into()),
        };
        assert!(err.to_string().contains("'war'"));
        assert!(err.source().is_some());
    }
}
