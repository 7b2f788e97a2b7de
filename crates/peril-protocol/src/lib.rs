//! Wire protocol for Peril.
//!
//! This crate defines what publishers and subscribers agree on across
//! process boundaries:
//!
//! - **Codecs** ([`Codec`], [`JsonCodec`], [`MsgPackCodec`], [`WireFormat`]) —
//!   how typed values become bytes and back.
//! - **Envelope** ([`Envelope`]) — bytes plus the content-type tag that
//!   tells a subscriber which codec produced them.
//! - **Routing** ([`routing`]) — exchange names and routing-key builders.
//!   Publishers and subscribers must build keys with the same helpers or
//!   their bindings silently stop matching.
//! - **Types** ([`PlayingState`], [`GameLog`]) — messages exchanged between
//!   the server and clients that carry no game rules.
//!
//! ```text
//! value ──Codec::encode──→ Envelope { content_type, body } ──→ broker
//! broker ──→ Envelope ──Envelope::open──→ value
//! ```

mod codec;
mod envelope;
mod error;
pub mod routing;
mod types;

pub use codec::{Codec, JSON_CONTENT_TYPE, MSGPACK_CONTENT_TYPE, WireFormat};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
#[cfg(feature = "msgpack")]
pub use codec::MsgPackCodec;
pub use envelope::Envelope;
pub use error::ProtocolError;
pub use types::{GameLog, PlayingState};
