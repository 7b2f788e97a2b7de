//! Error types for player commands.

use crate::UnitId;

/// A command was rejected. No state was changed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// Not one of the six regions.
    #[error("{0} is not a valid location")]
    UnknownLocation(String),

    /// Not infantry, cavalry, or artillery.
    #[error("{0} is not a valid unit")]
    UnknownRank(String),

    /// The player's army has no unit with this id.
    #[error("unit {0} not found in your army")]
    UnknownUnit(UnitId),

    /// A move named no units.
    #[error("a move needs at least one unit id")]
    NoUnitsGiven,

    /// The server has paused the game.
    #[error("the game is paused, you can not move units")]
    Paused,
}
