use std::time::Duration;

use peril::prelude::*;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Log sink
// ---------------------------------------------------------------------------

/// Prints each log line and hands it to `main` so the demo knows when the
/// war is over.
struct Chronicle {
    tx: mpsc::UnboundedSender<GameLog>,
}

impl Handler<GameLog> for Chronicle {
    async fn handle(&self, log: GameLog) -> Disposition {
        println!("[{}] {}", log.current_time.format("%H:%M:%S"), log.message);
        match self.tx.send(log) {
            Ok(()) => Disposition::Accept,
            Err(_) => Disposition::RetryLater,
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    peril::telemetry::init();

    let broker = Broker::new();
    let conn = broker.connect().await?;
    declare_exchanges(&conn).await?;
    let config = PerilConfig::builder()
        .handler_timeout(Duration::from_secs(5))
        .build();

    let server = GameServer::connect(&conn, &config).await?;
    let (tx, mut logs) = mpsc::unbounded_channel();
    let chronicle = server.subscribe_logs(Chronicle { tx }).await?;

    let alice = GameClient::connect(&conn, "alice", &config).await?;
    let bob = GameClient::connect(&conn, "bob", &config).await?;

    let mut raiders = Vec::new();
    for rank in ["cavalry", "cavalry", "artillery"] {
        raiders.push(alice.spawn("africa", rank).await?.id);
    }
    bob.spawn("europe", "infantry").await?;
    bob.spawn("europe", "infantry").await?;
    bob.spawn("asia", "artillery").await?;

    // A pause holds alice's army in place.
    server.pause().await?;
    while !alice.is_paused().await {
        tokio::task::yield_now().await;
    }
    match alice.move_units("europe", &raiders).await {
        Err(PerilError::Game(GameError::Paused)) => println!("alice waits for the game to resume"),
        other => println!("unexpected: {other:?}"),
    }
    server.resume().await?;
    while alice.is_paused().await {
        tokio::task::yield_now().await;
    }

    alice.move_units("europe", &raiders).await?;

    match tokio::time::timeout(Duration::from_secs(5), logs.recv()).await {
        Ok(Some(log)) => tracing::info!(username = %log.username, "war recorded"),
        Ok(None) | Err(_) => tracing::warn!("no war was recorded"),
    }

    for client in [&alice, &bob] {
        let player = client.status().await;
        println!("{}: {} unit(s)", player.username, player.army.len());
        for unit in player.army.units() {
            println!("  #{} {} in {}", unit.id, unit.rank, unit.location);
        }
    }

    alice.shutdown().await?;
    bob.shutdown().await?;
    chronicle.cancel().await?;
    server.shutdown().await?;
    conn.close().await?;
    Ok(())
}
