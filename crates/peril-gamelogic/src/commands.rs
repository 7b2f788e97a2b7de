//! Commands a player issues from their own client.

use std::collections::BTreeSet;

use crate::resolve::ArmyMove;
use crate::{GameError, GameState, Location, Player, Unit, UnitId, UnitRank};

impl GameState {
    /// Adds a unit to this player's army.
    ///
    /// # Errors
    /// [`GameError::UnknownLocation`] or [`GameError::UnknownRank`].
    pub fn spawn(&mut self, location: &str, rank: &str) -> Result<Unit, GameError> {
        let location: Location = location.parse()?;
        let rank: UnitRank = rank.parse()?;
        let unit = self.player.army.enlist(rank, location);
        tracing::info!(
            player = %self.player.username,
            id = %unit.id,
            %rank,
            %location,
            "unit spawned"
        );
        Ok(unit)
    }

    /// Moves the named units to `destination` and returns the move to
    /// publish.
    ///
    /// Nothing moves unless every id is valid. An id named more than once
    /// moves, and appears in the move, once.
    pub fn move_units(
        &mut self,
        destination: &str,
        ids: &[UnitId],
    ) -> Result<ArmyMove, GameError> {
        if self.paused {
            return Err(GameError::Paused);
        }
        let to_location: Location = destination.parse()?;
        if ids.is_empty() {
            return Err(GameError::NoUnitsGiven);
        }
        if let Some(&missing) = ids.iter().find(|id| self.player.army.get(**id).is_none()) {
            return Err(GameError::UnknownUnit(missing));
        }

        let mut seen = BTreeSet::new();
        let mut units = Vec::with_capacity(ids.len());
        for &id in ids.iter().filter(|id| seen.insert(**id)) {
            if let Some(unit) = self.player.army.get_mut(id) {
                unit.location = to_location;
                units.push(*unit);
            }
        }
        tracing::info!(
            player = %self.player.username,
            to = %to_location,
            count = units.len(),
            "units moved"
        );
        Ok(ArmyMove {
            player: self.player.clone(),
            units,
            to_location,
        })
    }

    /// A snapshot of this player and their army.
    pub fn status(&self) -> Player {
        self.player.clone()
    }
}
