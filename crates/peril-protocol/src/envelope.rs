//! The unit that actually crosses the broker: bytes plus a content-type tag.

use serde::{Serialize, de::DeserializeOwned};

use crate::{Codec, ProtocolError, WireFormat};

/// Encoded message body tagged with the codec that produced it.
///
/// The envelope does not know the logical type inside. Publisher and
/// subscriber agree on it out of band (by routing key); decoding only
/// checks that the bytes have the right structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Content type of [`body`](Self::body), e.g. `application/json`.
    pub content_type: String,
    /// Encoded payload.
    pub body: Vec<u8>,
}

impl Envelope {
    /// Wraps raw bytes received from the broker.
    pub fn new(content_type: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            body,
        }
    }

    /// Encodes `value` with `codec` and stamps the codec's content type.
    pub fn seal<C, T>(codec: &C, value: &T) -> Result<Self, ProtocolError>
    where
        C: Codec,
        T: Serialize,
    {
        Ok(Self {
            content_type: codec.content_type().to_string(),
            body: codec.encode(value)?,
        })
    }

    /// Decodes the body with whichever codec the content type names.
    ///
    /// # Errors
    /// [`ProtocolError::UnsupportedContentType`] for a tag no compiled-in
    /// codec produces, otherwise whatever that codec's decode returns.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        WireFormat::from_content_type(&self.content_type)?.decode(&self.body)
    }
}

#[cfg(all(test, feature = "json", feature = "msgpack"))]
mod tests {
    use super::*;
    use crate::{JsonCodec, MsgPackCodec, PlayingState};

    #[test]
    fn test_seal_stamps_content_type() {
        let env = Envelope::seal(&MsgPackCodec, &PlayingState { is_paused: true }).unwrap();
        assert_eq!(env.content_type, "application/x-msgpack");
    }

    #[test]
    fn test_decode_follows_the_tag_not_the_reader() {
        // Same value, both formats: each envelope decodes with its own codec.
        let value = PlayingState { is_paused: true };
        for env in [
            Envelope::seal(&JsonCodec, &value).unwrap(),
            Envelope::seal(&WireFormat::MsgPack, &value).unwrap(),
        ] {
            assert_eq!(env.decode::<PlayingState>().unwrap(), value);
        }
    }

    #[test]
    fn test_decode_with_lying_tag_fails() {
        let mut env = Envelope::seal(&JsonCodec, &PlayingState { is_paused: true }).unwrap();
        env.content_type = MsgPackCodec.content_type().to_string();
        assert!(matches!(
            env.decode::<PlayingState>(),
            Err(ProtocolError::MsgPackDecode(_))
        ));
    }

    #[test]
    fn test_decode_selects_codec_from_tag() {
        let env = Envelope::seal(&MsgPackCodec, &PlayingState { is_paused: true }).unwrap();
        let state: PlayingState = env.decode().unwrap();
        assert!(state.is_paused);
    }

    #[test]
    fn test_decode_unknown_tag() {
        let env = Envelope::new("text/plain", b"paused".to_vec());
        assert!(matches!(
            env.decode::<PlayingState>(),
            Err(ProtocolError::UnsupportedContentType(t)) if t == "text/plain"
        ));
    }
}
