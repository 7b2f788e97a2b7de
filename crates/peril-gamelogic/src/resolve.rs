//! Move and war resolution.
//!
//! [`resolve_move`] and [`resolve_war`] are pure: they read snapshots and
//! return a named outcome. Applying the outcome to a live army is the job
//! of [`GameState::handle_move`](crate::GameState::handle_move) and
//! [`GameState::handle_war`](crate::GameState::handle_war).
//!
//! Both outcome enums are closed on purpose. The engine maps each variant
//! to an acknowledgment with an exhaustive `match`, so adding a variant
//! without deciding its disposition does not compile.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{Location, Player, Unit};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Published by a player's client after a successful move command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmyMove {
    /// The mover, after the move was applied.
    pub player: Player,
    /// The units that moved, at their new location.
    pub units: Vec<Unit>,
    pub to_location: Location,
}

/// Published when a move lands on another player's units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionOfWar {
    /// Random id, stable across redeliveries of this recognition.
    pub id: u64,
    pub attacker: Player,
    pub defender: Player,
    /// Where the two armies met.
    pub location: Location,
}

impl RecognitionOfWar {
    pub fn new(attacker: Player, defender: Player, location: Location) -> Self {
        Self {
            id: rand::random(),
            attacker,
            defender,
            location,
        }
    }
}

// ---------------------------------------------------------------------------
// Move
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Nobody else is at the destination.
    Safe,
    /// The receiver has units at the destination.
    MakesWar,
    /// The move is an echo of the receiver's own publish.
    SamePlayer,
}

/// Decides what another player's move means for `receiver`.
pub fn resolve_move(receiver: &Player, mv: &ArmyMove) -> MoveOutcome {
    if mv.player.username == receiver.username {
        MoveOutcome::SamePlayer
    } else if receiver.army.has_units_at(mv.to_location) {
        MoveOutcome::MakesWar
    } else {
        MoveOutcome::Safe
    }
}

// ---------------------------------------------------------------------------
// War
// ---------------------------------------------------------------------------

/// Result of a war from the receiving player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarOutcome {
    /// The receiver is neither the attacker nor the defender.
    NotInvolved,
    /// One side has nothing at the contested location.
    NoUnits,
    OpponentWon,
    YouWon,
    Draw,
}

impl WarOutcome {
    /// `true` for the outcomes where combat actually happened.
    pub fn was_fought(self) -> bool {
        matches!(self, Self::OpponentWon | Self::YouWon | Self::Draw)
    }

    /// `true` when the receiver loses its units at the contested location.
    pub fn receiver_loses_units(self) -> bool {
        matches!(self, Self::OpponentWon | Self::Draw)
    }
}

/// A war outcome with the names needed for the game log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarResolution {
    pub outcome: WarOutcome,
    /// For a draw, the attacker.
    pub winner: String,
    /// For a draw, the defender.
    pub loser: String,
}

impl WarResolution {
    fn unfought(outcome: WarOutcome) -> Self {
        Self {
            outcome,
            winner: String::new(),
            loser: String::new(),
        }
    }

    /// The game log line for a fought war, `None` otherwise.
    pub fn log_message(&self) -> Option<String> {
        match self.outcome {
            WarOutcome::OpponentWon | WarOutcome::YouWon => {
                Some(format!("{} won a war against {}", self.winner, self.loser))
            }
            WarOutcome::Draw => Some(format!(
                "A war between {} and {} resulted in a draw",
                self.winner, self.loser
            )),
            WarOutcome::NotInvolved | WarOutcome::NoUnits => None,
        }
    }
}

/// Fights the war described by `rw` as seen by `receiver`.
///
/// Every attacking unit at the location is paired with every defending
/// unit there. Each pair scores a point for whichever side's rank beats
/// the other's; more points wins.
pub fn resolve_war(receiver: &str, rw: &RecognitionOfWar) -> WarResolution {
    let is_attacker = receiver == rw.attacker.username;
    if !is_attacker && receiver != rw.defender.username {
        return WarResolution::unfought(WarOutcome::NotInvolved);
    }

    let attackers: Vec<&Unit> = rw.attacker.army.at(rw.location).collect();
    let defenders: Vec<&Unit> = rw.defender.army.at(rw.location).collect();
    if attackers.is_empty() || defenders.is_empty() {
        return WarResolution::unfought(WarOutcome::NoUnits);
    }

    let mut attack = 0usize;
    let mut defence = 0usize;
    for a in &attackers {
        for d in &defenders {
            if a.rank.beats(d.rank) {
                attack += 1;
            } else if d.rank.beats(a.rank) {
                defence += 1;
            }
        }
    }

    let attacker = rw.attacker.username.clone();
    let defender = rw.defender.username.clone();
    let (outcome, winner, loser) = match attack.cmp(&defence) {
        Ordering::Greater if is_attacker => (WarOutcome::YouWon, attacker, defender),
        Ordering::Greater => (WarOutcome::OpponentWon, attacker, defender),
        Ordering::Less if is_attacker => (WarOutcome::OpponentWon, defender, attacker),
        Ordering::Less => (WarOutcome::YouWon, defender, attacker),
        Ordering::Equal => (WarOutcome::Draw, attacker, defender),
    };
    WarResolution {
        outcome,
        winner,
        loser,
    }
}
