//! Error types for the protocol layer.
//!
//! Every error here is local to one message: a value that cannot be
//! encoded, or bytes that cannot be decoded. None of them says anything
//! about the health of the broker connection.

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSON serialization failed.
    #[cfg(feature = "json")]
    #[error("json encode failed: {0}")]
    JsonEncode(#[source] serde_json::Error),

    /// JSON deserialization failed: malformed text, missing fields,
    /// or the wrong shape for the requested type.
    #[cfg(feature = "json")]
    #[error("json decode failed: {0}")]
    JsonDecode(#[source] serde_json::Error),

    /// MessagePack serialization failed.
    #[cfg(feature = "msgpack")]
    #[error("msgpack encode failed: {0}")]
    MsgPackEncode(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed: corrupted bytes or a
    /// layout that does not match the requested type.
    #[cfg(feature = "msgpack")]
    #[error("msgpack decode failed: {0}")]
    MsgPackDecode(#[source] rmp_serde::decode::Error),

    /// The content type is not one this build understands.
    #[error("unsupported content type {0:?}")]
    UnsupportedContentType(String),
}
