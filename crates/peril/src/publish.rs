//! Typed publishing.

use peril_broker::Properties;
use peril_protocol::{Codec, Envelope, JsonCodec, MsgPackCodec};
use serde::Serialize;

use crate::PerilError;
use crate::transport::TransportChannel;

/// Encodes `value` with `codec` and publishes it with the codec's content
/// type.
///
/// Publishing to a key nobody is bound to is not an error; the broker
/// drops the message.
pub async fn publish<Ch, C, T>(
    channel: &Ch,
    codec: &C,
    exchange: &str,
    key: &str,
    value: &T,
) -> Result<(), PerilError>
where
    Ch: TransportChannel,
    C: Codec,
    T: Serialize,
{
    let Envelope { content_type, body } = Envelope::seal(codec, value)?;
    channel
        .basic_publish(exchange, key, Properties::with_content_type(content_type), body)
        .await?;
    tracing::debug!(exchange, key, "message published");
    Ok(())
}

/// [`publish`] with [`JsonCodec`].
pub async fn publish_json<Ch: TransportChannel, T: Serialize>(
    channel: &Ch,
    exchange: &str,
    key: &str,
    value: &T,
) -> Result<(), PerilError> {
    publish(channel, &JsonCodec, exchange, key, value).await
}

/// [`publish`] with [`MsgPackCodec`].
pub async fn publish_msgpack<Ch: TransportChannel, T: Serialize>(
    channel: &Ch,
    exchange: &str,
    key: &str,
    value: &T,
) -> Result<(), PerilError> {
    publish(channel, &MsgPackCodec, exchange, key, value).await
}

#[cfg(test)]
mod tests {
    use peril_broker::{
        Broker, BrokerError, Channel, ExchangeKind, ExchangeOptions, QueueOptions,
    };
    use peril_protocol::PlayingState;

    use super::*;

    async fn channel_with_queue() -> Channel {
        let broker = Broker::new();
        let conn = broker.connect().await.unwrap();
        let channel = conn.create_channel().await.unwrap();
        channel
            .exchange_declare("peril_direct", ExchangeKind::Direct, ExchangeOptions::default())
            .await
            .unwrap();
        channel
            .queue_declare("pause.test", QueueOptions::default(), Default::default())
            .await
            .unwrap();
        channel
            .queue_bind("pause.test", "peril_direct", "pause")
            .await
            .unwrap();
        channel
    }

    #[tokio::test]
    async fn test_publish_json_sets_content_type() {
        let channel = channel_with_queue().await;
        publish_json(&channel, "peril_direct", "pause", &PlayingState { is_paused: true })
            .await
            .unwrap();

        let delivery = channel.basic_get("pause.test").await.unwrap().unwrap();
        assert_eq!(
            delivery.properties.content_type.as_deref(),
            Some("application/json")
        );
        let state: PlayingState = serde_json::from_slice(&delivery.data).unwrap();
        assert!(state.is_paused);
    }

    #[tokio::test]
    async fn test_publish_msgpack_sets_content_type() {
        let channel = channel_with_queue().await;
        publish_msgpack(&channel, "peril_direct", "pause", &PlayingState { is_paused: false })
            .await
            .unwrap();

        let delivery = channel.basic_get("pause.test").await.unwrap().unwrap();
        assert_eq!(
            delivery.properties.content_type.as_deref(),
            Some("application/x-msgpack")
        );
    }

    #[tokio::test]
    async fn test_publish_to_unknown_exchange_fails() {
        let channel = channel_with_queue().await;
        let err = publish_json(&channel, "missing", "pause", &PlayingState { is_paused: true })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PerilError::Broker(BrokerError::ExchangeNotFound(_))
        ));
    }
}
