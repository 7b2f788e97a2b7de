//! The player role.
//!
//! A [`GameClient`] owns one player's [`GameState`] and three
//! subscriptions that mutate it:
//!
//! | queue                   | binding          | durability | handler          |
//! |-------------------------|------------------|------------|------------------|
//! | `pause.<username>`      | `pause` (direct) | transient  | [`PauseHandler`] |
//! | `army_moves.<username>` | `army_moves.*`   | transient  | [`MoveHandler`]  |
//! | `war`                   | `war.*`          | durable    | [`WarHandler`]   |
//!
//! Handlers hold the state lock only while resolving. It is released
//! before anything is published.

use std::sync::Arc;

use peril_broker::Connection;
use peril_gamelogic::{
    ArmyMove, GameState, MoveOutcome, Player, RecognitionOfWar, Unit, UnitId, WarOutcome,
};
use peril_protocol::routing::{
    ARMY_MOVES_PREFIX, EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG, PAUSE_KEY,
    WAR_RECOGNITIONS_PREFIX, keyed, wildcard,
};
use peril_protocol::{GameLog, PlayingState};
use tokio::sync::Mutex;

use crate::ack::Disposition;
use crate::publish::{publish_json, publish_msgpack};
use crate::subscribe::{Handler, Subscription, subscribe_json};
use crate::topology::{Topology, declare_and_bind};
use crate::transport::{Transport, TransportChannel};
use crate::{PerilConfig, PerilError};

/// Game state shared between a client's command path and its handlers.
pub type SharedState = Arc<Mutex<GameState>>;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Applies pause/resume broadcasts. Always accepts.
pub struct PauseHandler {
    state: SharedState,
}

impl Handler<PlayingState> for PauseHandler {
    async fn handle(&self, message: PlayingState) -> Disposition {
        self.state.lock().await.handle_pause(message);
        Disposition::Accept
    }
}

/// Resolves other players' moves and raises wars.
///
/// | outcome      | disposition                                        |
/// |--------------|----------------------------------------------------|
/// | `Safe`       | accept                                             |
/// | `MakesWar`   | publish to `war.<attacker>`, accept; retry if that fails |
/// | `SamePlayer` | discard                                            |
pub struct MoveHandler<Ch> {
    state: SharedState,
    publisher: Ch,
}

impl<Ch: TransportChannel> Handler<ArmyMove> for MoveHandler<Ch> {
    async fn handle(&self, mv: ArmyMove) -> Disposition {
        let war = {
            let state = self.state.lock().await;
            match state.handle_move(&mv) {
                MoveOutcome::Safe => return Disposition::Accept,
                MoveOutcome::SamePlayer => return Disposition::Discard,
                MoveOutcome::MakesWar => state.recognize_war(&mv),
            }
        };
        self.declare_war(&war).await
    }
}

impl<Ch: TransportChannel> MoveHandler<Ch> {
    async fn declare_war(&self, rw: &RecognitionOfWar) -> Disposition {
        let key = keyed(WAR_RECOGNITIONS_PREFIX, &rw.attacker.username);
        match publish_json(&self.publisher, EXCHANGE_PERIL_TOPIC, &key, rw).await {
            Ok(()) => {
                tracing::info!(
                    war = rw.id,
                    attacker = %rw.attacker.username,
                    defender = %rw.defender.username,
                    location = %rw.location,
                    "war declared"
                );
                Disposition::Accept
            }
            Err(e) => {
                tracing::warn!(war = rw.id, error = %e, "failed to publish war recognition");
                Disposition::RetryLater
            }
        }
    }
}

/// Fights wars this player is part of and records the result.
///
/// | outcome                          | disposition                            |
/// |----------------------------------|----------------------------------------|
/// | `NotInvolved`                    | retry (another player must take it)    |
/// | `NoUnits`                        | discard                                |
/// | `OpponentWon`, `YouWon`, `Draw`  | publish game log, accept; retry if that fails |
///
/// A war is fought once per recognition id. Redeliveries reuse the first
/// result, so a retried log publish never fights the war again.
pub struct WarHandler<Ch> {
    state: SharedState,
    publisher: Ch,
}

impl<Ch> WarHandler<Ch> {
    /// A handler that publishes game logs on `publisher`.
    pub fn new(state: SharedState, publisher: Ch) -> Self {
        Self { state, publisher }
    }
}

impl<Ch: TransportChannel> Handler<RecognitionOfWar> for WarHandler<Ch> {
    async fn handle(&self, rw: RecognitionOfWar) -> Disposition {
        let (username, resolution) = {
            let mut state = self.state.lock().await;
            let resolution = state.handle_war(&rw);
            (state.username().to_string(), resolution)
        };

        match resolution.outcome {
            WarOutcome::NotInvolved => Disposition::RetryLater,
            WarOutcome::NoUnits => Disposition::Discard,
            WarOutcome::OpponentWon | WarOutcome::YouWon | WarOutcome::Draw => {
                let Some(message) = resolution.log_message() else {
                    tracing::error!(war = rw.id, outcome = ?resolution.outcome, "fought war has no log line");
                    return Disposition::Discard;
                };
                tracing::info!(war = rw.id, %message, "war resolved");
                let log = GameLog::now(username, message);
                let key = keyed(GAME_LOG_SLUG, &rw.attacker.username);
                match publish_msgpack(&self.publisher, EXCHANGE_PERIL_TOPIC, &key, &log).await {
                    Ok(()) => Disposition::Accept,
                    Err(e) => {
                        tracing::warn!(war = rw.id, error = %e, "failed to publish game log");
                        Disposition::RetryLater
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// GameClient
// ---------------------------------------------------------------------------

/// One connected player.
pub struct GameClient<T: Transport = Connection> {
    username: String,
    state: SharedState,
    publisher: T::Channel,
    log_channel: T::Channel,
    subscriptions: Vec<Subscription<T::Channel>>,
}

impl<T: Transport> GameClient<T> {
    /// Declares this player's queues and starts their handlers.
    ///
    /// # Errors
    /// Fails if any queue cannot be declared or bound. Subscriptions
    /// already started stay attached to `conn` and end when it closes.
    pub async fn connect(
        conn: &T,
        username: impl Into<String>,
        config: &PerilConfig,
    ) -> Result<Self, PerilError> {
        let username = username.into();
        let state: SharedState = Arc::new(Mutex::new(GameState::new(username.clone())));
        let options = config.subscribe_options();

        // Logs must have somewhere to land even before the server subscribes.
        let (log_channel, _) = declare_and_bind(
            conn,
            &Topology::durable(EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG, wildcard(GAME_LOG_SLUG))
                .with_dead_letter_exchange(&config.dead_letter_exchange),
        )
        .await?;

        let pause = subscribe_json::<PlayingState, _, _>(
            conn,
            &Topology::transient(EXCHANGE_PERIL_DIRECT, keyed(PAUSE_KEY, &username), PAUSE_KEY),
            options,
            PauseHandler {
                state: Arc::clone(&state),
            },
        )
        .await?;

        let war = subscribe_json::<RecognitionOfWar, _, _>(
            conn,
            &Topology::durable(
                EXCHANGE_PERIL_TOPIC,
                WAR_RECOGNITIONS_PREFIX,
                wildcard(WAR_RECOGNITIONS_PREFIX),
            )
            .with_dead_letter_exchange(&config.dead_letter_exchange),
            options,
            WarHandler::new(Arc::clone(&state), log_channel.clone()),
        )
        .await?;

        let moves = subscribe_json::<ArmyMove, _, _>(
            conn,
            &Topology::transient(
                EXCHANGE_PERIL_TOPIC,
                keyed(ARMY_MOVES_PREFIX, &username),
                wildcard(ARMY_MOVES_PREFIX),
            ),
            options,
            MoveHandler {
                state: Arc::clone(&state),
                publisher: conn.create_channel().await?,
            },
        )
        .await?;

        let publisher = conn.create_channel().await?;
        tracing::info!(%username, "client connected");
        Ok(Self {
            username,
            state,
            publisher,
            log_channel,
            subscriptions: vec![pause, war, moves],
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The state shared with this client's handlers.
    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    pub fn subscriptions(&self) -> &[Subscription<T::Channel>] {
        &self.subscriptions
    }

    /// Adds a unit at `location`.
    pub async fn spawn(&self, location: &str, rank: &str) -> Result<Unit, PerilError> {
        Ok(self.state.lock().await.spawn(location, rank)?)
    }

    /// Moves units and announces the move on `army_moves.<username>`.
    ///
    /// The move is applied locally before it is published; a publish
    /// failure is returned but not rolled back.
    pub async fn move_units(
        &self,
        destination: &str,
        ids: &[UnitId],
    ) -> Result<ArmyMove, PerilError> {
        let mv = self.state.lock().await.move_units(destination, ids)?;
        let key = keyed(ARMY_MOVES_PREFIX, &self.username);
        publish_json(&self.publisher, EXCHANGE_PERIL_TOPIC, &key, &mv).await?;
        Ok(mv)
    }

    /// A snapshot of this player.
    pub async fn status(&self) -> Player {
        self.state.lock().await.status()
    }

    pub async fn is_paused(&self) -> bool {
        self.state.lock().await.is_paused()
    }

    /// Cancels every subscription and closes this client's channels.
    pub async fn shutdown(self) -> Result<(), PerilError> {
        for subscription in self.subscriptions {
            subscription.cancel().await?;
        }
        self.publisher.close().await?;
        self.log_channel.close().await?;
        tracing::info!(username = %self.username, "client shut down");
        Ok(())
    }
}
