//! Game rules for Peril.
//!
//! Everything here is synchronous and free of I/O. The engine in the
//! `peril` crate decodes a message, locks the shared [`GameState`], calls
//! one of the `handle_*` methods, releases the lock, and only then talks to
//! the broker.
//!
//! - [`catalog`] — the closed sets of locations and unit ranks.
//! - [`Player`], [`Army`], [`Unit`] — what a player owns.
//! - Commands ([`GameState::spawn`], [`GameState::move_units`],
//!   [`GameState::status`]) — local actions from the player's own client.
//! - Resolution ([`resolve_move`], [`resolve_war`]) — named outcomes for
//!   events received from other players.

pub mod catalog;
mod army;
mod commands;
mod error;
mod resolve;
mod state;

pub use army::{Army, Player, Unit, UnitId};
pub use catalog::{Location, UnitRank};
pub use error::GameError;
pub use resolve::{
    ArmyMove, MoveOutcome, RecognitionOfWar, WarOutcome, WarResolution, resolve_move,
    resolve_war,
};
pub use state::{GameState, WAR_LEDGER_CAPACITY};
