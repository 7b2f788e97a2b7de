//! The single mutable game state a client owns.

use std::collections::VecDeque;

use peril_protocol::PlayingState;

use crate::resolve::{ArmyMove, MoveOutcome, RecognitionOfWar, WarResolution};
use crate::{Player, resolve_move, resolve_war};

/// Number of war resolutions remembered for redelivery.
pub const WAR_LEDGER_CAPACITY: usize = 256;

/// One player's view of the game.
///
/// Subscriptions share it behind a lock. Every method here is
/// synchronous so the lock is never held across a broker call.
#[derive(Debug, Clone)]
pub struct GameState {
    pub(crate) player: Player,
    pub(crate) paused: bool,
    ledger: WarLedger,
}

impl GameState {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            player: Player::new(username),
            paused: false,
            ledger: WarLedger::new(WAR_LEDGER_CAPACITY),
        }
    }

    pub fn username(&self) -> &str {
        &self.player.username
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Applies a pause or resume broadcast from the server.
    pub fn handle_pause(&mut self, state: PlayingState) {
        if state.is_paused {
            tracing::info!(player = %self.player.username, "game paused");
        } else {
            tracing::info!(player = %self.player.username, "game resumed");
        }
        self.paused = state.is_paused;
    }

    /// Resolves another player's move against this player's army.
    pub fn handle_move(&self, mv: &ArmyMove) -> MoveOutcome {
        let outcome = resolve_move(&self.player, mv);
        tracing::debug!(
            player = %self.player.username,
            mover = %mv.player.username,
            to = %mv.to_location,
            ?outcome,
            "move resolved"
        );
        outcome
    }

    /// A war recognition naming the mover as attacker and this player as
    /// defender.
    pub fn recognize_war(&self, mv: &ArmyMove) -> RecognitionOfWar {
        RecognitionOfWar::new(mv.player.clone(), self.player.clone(), mv.to_location)
    }

    /// Resolves a war and applies losses to this player's army.
    ///
    /// A recognition seen before returns its first resolution and leaves
    /// the army alone, so a redelivered war is never fought twice.
    pub fn handle_war(&mut self, rw: &RecognitionOfWar) -> WarResolution {
        if let Some(cached) = self.ledger.get(rw.id) {
            tracing::debug!(war = rw.id, "war already resolved, reusing outcome");
            return cached.clone();
        }

        let resolution = resolve_war(&self.player.username, rw);
        if resolution.outcome.receiver_loses_units() {
            let lost = self.player.army.remove_at(rw.location);
            tracing::info!(
                player = %self.player.username,
                location = %rw.location,
                lost,
                "units lost in war"
            );
        }
        if resolution.outcome.was_fought() {
            self.ledger.insert(rw.id, resolution.clone());
        }
        resolution
    }
}

/// Bounded recognition id → resolution map. The oldest entry is evicted
/// first.
#[derive(Debug, Clone)]
struct WarLedger {
    entries: VecDeque<(u64, WarResolution)>,
    capacity: usize,
}

impl WarLedger {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn get(&self, id: u64) -> Option<&WarResolution> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == id)
            .map(|(_, resolution)| resolution)
    }

    fn insert(&mut self, id: u64, resolution: WarResolution) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((id, resolution));
    }
}
