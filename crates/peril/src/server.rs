//! The server role: pause control and the game log stream.

use peril_broker::Connection;
use peril_protocol::routing::{
    EXCHANGE_PERIL_DIRECT, EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG, PAUSE_KEY, wildcard,
};
use peril_protocol::{GameLog, PlayingState};

use crate::ack::Disposition;
use crate::publish::publish_json;
use crate::subscribe::{Handler, Subscription, subscribe_msgpack};
use crate::topology::Topology;
use crate::transport::{Transport, TransportChannel};
use crate::{PerilConfig, PerilError};

/// Records game logs through `tracing` and accepts them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogHandler;

impl Handler<GameLog> for TracingLogHandler {
    async fn handle(&self, log: GameLog) -> Disposition {
        tracing::info!(
            time = %log.current_time.to_rfc3339(),
            username = %log.username,
            "{}",
            log.message
        );
        Disposition::Accept
    }
}

/// The authoritative server process.
///
/// ```rust,ignore
/// let server = GameServer::connect(&conn, &PerilConfig::default()).await?;
/// let logs = server.subscribe_logs(TracingLogHandler).await?;
/// server.pause().await?;
/// ```
pub struct GameServer<T: Transport = Connection> {
    connection: T,
    publisher: T::Channel,
    config: PerilConfig,
}

impl<T: Transport> GameServer<T> {
    pub async fn connect(conn: &T, config: &PerilConfig) -> Result<Self, PerilError> {
        let publisher = conn.create_channel().await?;
        tracing::info!("server connected");
        Ok(Self {
            connection: conn.clone(),
            publisher,
            config: config.clone(),
        })
    }

    /// Tells every client to stop accepting move commands.
    pub async fn pause(&self) -> Result<(), PerilError> {
        self.broadcast(true).await
    }

    pub async fn resume(&self) -> Result<(), PerilError> {
        self.broadcast(false).await
    }

    async fn broadcast(&self, is_paused: bool) -> Result<(), PerilError> {
        publish_json(
            &self.publisher,
            EXCHANGE_PERIL_DIRECT,
            PAUSE_KEY,
            &PlayingState { is_paused },
        )
        .await?;
        tracing::info!(is_paused, "playing state broadcast");
        Ok(())
    }

    /// Consumes the durable `game_logs` queue with `handler`.
    pub async fn subscribe_logs<H: Handler<GameLog>>(
        &self,
        handler: H,
    ) -> Result<Subscription<T::Channel>, PerilError> {
        let topology =
            Topology::durable(EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG, wildcard(GAME_LOG_SLUG))
                .with_dead_letter_exchange(&self.config.dead_letter_exchange);
        subscribe_msgpack::<GameLog, H, T>(
            &self.connection,
            &topology,
            self.config.subscribe_options(),
            handler,
        )
        .await
    }

    pub async fn shutdown(self) -> Result<(), PerilError> {
        self.publisher.close().await?;
        tracing::info!("server shut down");
        Ok(())
    }
}
