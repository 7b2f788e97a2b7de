//! Units, armies, and players.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Location, UnitRank};

// ---------------------------------------------------------------------------
// UnitId
// ---------------------------------------------------------------------------

/// Identifies a unit within one player's army.
///
/// Ids are handed out by [`Army::enlist`] from a per-army counter and are
/// never reused, even after the unit is lost in a war.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(u32);

impl UnitId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> u32 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Unit / Army / Player
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub rank: UnitRank,
    pub location: Location,
}

/// A player's units, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Army {
    units: BTreeMap<UnitId, Unit>,
    next_id: u32,
}

impl Army {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new unit and returns it.
    ///
    /// The first unit gets id 1, and while nothing has been lost each new
    /// id equals the army size.
    pub fn enlist(&mut self, rank: UnitRank, location: Location) -> Unit {
        self.next_id = self.next_id.max(self.units.len() as u32) + 1;
        let unit = Unit {
            id: UnitId(self.next_id),
            rank,
            location,
        };
        self.units.insert(unit.id, unit);
        unit
    }

    pub fn get(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: UnitId) -> Option<&mut Unit> {
        self.units.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// All units in id order.
    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    /// Units currently stationed at `location`.
    pub fn at(&self, location: Location) -> impl Iterator<Item = &Unit> {
        self.units().filter(move |unit| unit.location == location)
    }

    pub fn has_units_at(&self, location: Location) -> bool {
        self.at(location).next().is_some()
    }

    /// Removes every unit at `location` and returns how many were lost.
    pub fn remove_at(&mut self, location: Location) -> usize {
        let before = self.units.len();
        self.units.retain(|_, unit| unit.location != location);
        before - self.units.len()
    }
}

/// A player and everything they own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub username: String,
    pub army: Army,
}

impl Player {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            army: Army::new(),
        }
    }
}
