//! Wire types shared by the server and clients that carry no game rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Broadcast by the server on every pause or resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayingState {
    pub is_paused: bool,
}

/// One line of the append-only war record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLog {
    /// When the war was resolved.
    pub current_time: DateTime<Utc>,
    /// Human-readable result, e.g. `"alice won a war against bob"`.
    pub message: String,
    /// The player whose client resolved the war.
    pub username: String,
}

impl GameLog {
    /// A log stamped with the current time.
    pub fn now(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            current_time: Utc::now(),
            message: message.into(),
            username: username.into(),
        }
    }
}
