//! Game messages survive both wire formats unchanged.

use peril_gamelogic::{ArmyMove, GameState, Location, Player, RecognitionOfWar, UnitRank};
use peril_protocol::{Codec, WireFormat};
use proptest::prelude::*;

// =========================================================================
// Strategies
// =========================================================================

fn arb_location() -> impl Strategy<Value = Location> {
    prop::sample::select(Location::ALL.to_vec())
}

fn arb_rank() -> impl Strategy<Value = UnitRank> {
    prop::sample::select(UnitRank::ALL.to_vec())
}

/// A player whose army has been through spawns and, optionally, a lost
/// war, so unit ids can have gaps and the id counter runs ahead of the
/// army size.
fn arb_player(name: &'static str) -> impl Strategy<Value = Player> {
    (
        prop::collection::vec((arb_rank(), arb_location()), 0..12),
        prop::option::of(arb_location()),
    )
        .prop_map(move |(units, lost_at)| {
            let mut state = GameState::new(name);
            for (rank, location) in units {
                state.spawn(location.as_str(), rank.as_str()).unwrap();
            }
            let mut player = state.status();
            if let Some(location) = lost_at {
                player.army.remove_at(location);
            }
            player
        })
}

fn round_trip<T>(value: &T) -> Result<(), TestCaseError>
where
    T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + std::fmt::Debug,
{
    for format in [WireFormat::Json, WireFormat::MsgPack] {
        let bytes = format.encode(value).unwrap();
        let decoded: T = format.decode(&bytes).unwrap();
        prop_assert_eq!(&decoded, value, "through {}", format.content_type());
    }
    Ok(())
}

// =========================================================================
// Properties
// =========================================================================

proptest! {
    #[test]
    fn prop_army_move_survives_both_codecs(
        player in arb_player("alice"),
        to_location in arb_location(),
        pick in prop::collection::vec(any::<prop::sample::Index>(), 1..4),
    ) {
        let units: Vec<_> = player.army.units().copied().collect();
        prop_assume!(!units.is_empty());
        let mv = ArmyMove {
            units: pick.iter().map(|i| *i.get(&units)).collect(),
            player,
            to_location,
        };
        round_trip(&mv)?;
    }

    #[test]
    fn prop_recognition_of_war_survives_both_codecs(
        attacker in arb_player("alice"),
        defender in arb_player("bob"),
        location in arb_location(),
    ) {
        let rw = RecognitionOfWar::new(attacker, defender, location);
        round_trip(&rw)?;
    }
}
