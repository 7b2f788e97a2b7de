//! Codec trait and implementations for serializing/deserializing messages.
//!
//! Two formats share the [`Codec`] interface:
//!
//! - [`JsonCodec`] — self-describing text. Decoding needs no schema and
//!   fails only on malformed or mis-shaped input. Used for gameplay events.
//! - [`MsgPackCodec`] — compact binary. Structs are written as positional
//!   arrays with no field names, so the decoder must know the destination
//!   type statically and both ends must agree on its layout. Used for the
//!   append-only game log stream.
//!
//! [`WireFormat`] picks one of them at runtime from an envelope's
//! content-type tag.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `encode` and `decode` are generic over the message type: the same
/// codec value serves every channel, and the call site names the type.
pub trait Codec: Send + Sync + 'static {
    /// The content-type tag stamped on messages this codec produces.
    fn content_type(&self) -> &'static str;

    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns an encode variant of [`ProtocolError`] if the value cannot
    /// be represented in this format.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns a decode variant of [`ProtocolError`] if the bytes are
    /// malformed, truncated, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// Content type produced by [`JsonCodec`].
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Content type produced by [`MsgPackCodec`].
pub const MSGPACK_CONTENT_TYPE: &str = "application/x-msgpack";

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// ```rust
/// use peril_protocol::{Codec, JsonCodec, PlayingState};
///
/// let codec = JsonCodec;
/// let bytes = codec.encode(&PlayingState { is_paused: true }).unwrap();
/// let decoded: PlayingState = codec.decode(&bytes).unwrap();
/// assert!(decoded.is_paused);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::JsonEncode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::JsonDecode)
    }
}

// ---------------------------------------------------------------------------
// MsgPackCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses MessagePack (via `rmp-serde`) in its compact,
/// positional form.
#[cfg(feature = "msgpack")]
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

#[cfg(feature = "msgpack")]
impl Codec for MsgPackCodec {
    fn content_type(&self) -> &'static str {
        MSGPACK_CONTENT_TYPE
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec(value).map_err(ProtocolError::MsgPackEncode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        rmp_serde::from_slice(data).map_err(ProtocolError::MsgPackDecode)
    }
}

// ---------------------------------------------------------------------------
// WireFormat
// ---------------------------------------------------------------------------

/// Runtime choice between the codecs compiled into this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// [`JsonCodec`].
    #[cfg(feature = "json")]
    Json,
    /// [`MsgPackCodec`].
    #[cfg(feature = "msgpack")]
    MsgPack,
}

impl WireFormat {
    /// Looks up the format that produced `content_type`.
    ///
    /// # Errors
    /// [`ProtocolError::UnsupportedContentType`] for unknown tags.
    pub fn from_content_type(content_type: &str) -> Result<Self, ProtocolError> {
        match content_type {
            #[cfg(feature = "json")]
            JSON_CONTENT_TYPE => Ok(Self::Json),
            #[cfg(feature = "msgpack")]
            MSGPACK_CONTENT_TYPE => Ok(Self::MsgPack),
            other => Err(ProtocolError::UnsupportedContentType(other.to_string())),
        }
    }
}

impl Codec for WireFormat {
    fn content_type(&self) -> &'static str {
        match *self {
            #[cfg(feature = "json")]
            Self::Json => JsonCodec.content_type(),
            #[cfg(feature = "msgpack")]
            Self::MsgPack => MsgPackCodec.content_type(),
        }
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        match *self {
            #[cfg(feature = "json")]
            Self::Json => JsonCodec.encode(value),
            #[cfg(feature = "msgpack")]
            Self::MsgPack => MsgPackCodec.encode(value),
        }
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        match *self {
            #[cfg(feature = "json")]
            Self::Json => JsonCodec.decode(data),
            #[cfg(feature = "msgpack")]
            Self::MsgPack => MsgPackCodec.decode(data),
        }
    }
}

#[cfg(all(test, feature = "json", feature = "msgpack"))]
mod tests {
    use chrono::DateTime;
    use proptest::prelude::*;
    use serde::Deserialize;

    use super::*;
    use crate::GameLog;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u32,
        name: String,
        tags: Vec<String>,
    }

    fn sample() -> Sample {
        Sample {
            id: 7,
            name: "alice".into(),
            tags: vec!["cavalry".into(), "europe".into()],
        }
    }

    #[test]
    fn test_content_types_differ() {
        assert_eq!(JsonCodec.content_type(), "application/json");
        assert_eq!(MsgPackCodec.content_type(), "application/x-msgpack");
    }

    #[test]
    fn test_json_is_self_describing() {
        let bytes = JsonCodec.encode(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["name"], "alice");
    }

    #[test]
    fn test_msgpack_is_positional() {
        // Compact encoding carries no field names.
        let bytes = MsgPackCodec.encode(&sample()).unwrap();
        assert!(!bytes.windows(4).any(|w| w == b"name"));
        let decoded: Sample = MsgPackCodec.decode(&bytes).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_json_decode_garbage_fails() {
        let err = JsonCodec.decode::<Sample>(b"not json").unwrap_err();
        assert!(matches!(err, ProtocolError::JsonDecode(_)));
    }

    #[test]
    fn test_msgpack_decode_truncated_fails() {
        let bytes = MsgPackCodec.encode(&sample()).unwrap();
        let err = MsgPackCodec
            .decode::<Sample>(&bytes[..bytes.len() / 2])
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MsgPackDecode(_)));
    }

    #[test]
    fn test_msgpack_decode_wrong_layout_fails() {
        // A bare integer is not a three-field struct.
        let bytes = MsgPackCodec.encode(&42u8).unwrap();
        assert!(MsgPackCodec.decode::<Sample>(&bytes).is_err());
    }

    #[test]
    fn test_wire_format_from_content_type() {
        assert_eq!(
            WireFormat::from_content_type("application/json").unwrap(),
            WireFormat::Json
        );
        assert_eq!(
            WireFormat::from_content_type("application/x-msgpack").unwrap(),
            WireFormat::MsgPack
        );
        assert!(matches!(
            WireFormat::from_content_type("application/gob"),
            Err(ProtocolError::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn test_wire_format_delegates_to_codec() {
        let bytes = WireFormat::MsgPack.encode(&sample()).unwrap();
        assert_eq!(bytes, MsgPackCodec.encode(&sample()).unwrap());
        assert_eq!(WireFormat::Json.content_type(), JSON_CONTENT_TYPE);
    }

    proptest! {
        #[test]
        fn prop_game_log_survives_both_codecs(
            secs in 0i64..4_000_000_000,
            nanos in 0u32..1_000_000_000,
            message in ".*",
            username in "[a-z]{1,12}",
        ) {
            let log = GameLog {
                current_time: DateTime::from_timestamp(secs, nanos).unwrap(),
                message,
                username,
            };
            for format in [WireFormat::Json, WireFormat::MsgPack] {
                let bytes = format.encode(&log).unwrap();
                let decoded: GameLog = format.decode(&bytes).unwrap();
                prop_assert_eq!(&decoded, &log);
            }
        }
    }
}
