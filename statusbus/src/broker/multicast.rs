use std::{
    net::SocketAddrV4,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_stream::stream;
use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio_stream::StreamExt;
use tokio_util::{codec::Encoder as _, udp::UdpFramed};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
    broker::{Broker, BrokerError, BrokerStream},
    codec::{split, Decoder, Encoder, Reassembler},
    constants::{HEADER_SIZE, MAX_PAYLOAD_SIZE},
    transport::{bind_multicast, connect_multicast, MulticastOptions},
};

/// A broker over one multicast group. Every topic shares the group; each
/// subscription opens its own socket and drops datagrams for other topics.
/// Payloads larger than one datagram are sent as several fragments and
/// reassembled per sender.
///
/// Multicast is best effort: lost datagrams are not recovered, which is
/// tolerable because every envelope carries the full snapshot. A message
/// missing a fragment is simply never delivered.
pub struct MulticastBroker {
    group: SocketAddrV4,
    options: MulticastOptions,
    socket: Arc<UdpSocket>,
    next_message: AtomicU64,
}

impl MulticastBroker {
    pub async fn new(group: SocketAddrV4, options: MulticastOptions) -> Result<Self, BrokerError> {
        let socket = connect_multicast(&group, &options).await?;
        debug!(%group, "Joined multicast group");
        Ok(Self {
            group,
            options,
            socket: Arc::new(socket),
            // random start so a restarted sender does not reuse ids
            next_message: AtomicU64::new(Uuid::new_v4().as_u128() as u64),
        })
    }

    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }
}

#[async_trait::async_trait]
impl Broker for MulticastBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        let message_id = self.next_message.fetch_add(1, Ordering::Relaxed);
        let frames = split(topic, message_id, payload)?;
        let count = frames.len();
        let mut buffer = BytesMut::with_capacity(HEADER_SIZE + MAX_PAYLOAD_SIZE);
        for frame in frames {
            buffer.clear();
            Encoder.encode(frame, &mut buffer)?;
            self.socket.send(&buffer).await?;
        }
        trace!(topic, message = message_id, fragments = count, "Sent message");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BrokerStream, BrokerError> {
        let socket = bind_multicast(&self.group, &self.options)?;
        let mut framed = UdpFramed::new(socket, Decoder::new());
        let topic = topic.to_owned();
        Ok(Box::pin(stream! {
            let mut reassembler = Reassembler::new();
            while let Some(item) = framed.next().await {
                match item {
                    Ok((frame, from)) if frame.topic == topic => {
                        if let Some(message) = reassembler.push(from, frame) {
                            yield Ok(message.payload);
                        }
                    }
                    Ok((frame, from)) => {
                        trace!(topic = %frame.topic, %from, "Ignoring datagram for another topic");
                    }
                    Err(e) => yield Err(BrokerError::from(e)),
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::constants::MAX_MESSAGE_SIZE;

    #[tokio::test]
    async fn delivers_by_topic() -> anyhow::Result<()> {
        let group = SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 124), 4637);
        let broker = MulticastBroker::new(group, MulticastOptions::default()).await?;
        let mut site = broker.subscribe("site").await?;

        broker
            .publish("system", Bytes::from_static(b"ignored"))
            .await?;
        broker
            .publish("site", Bytes::from_static(b"{\"a\":1}"))
            .await?;

        assert_eq!(site.next().await.unwrap()?, Bytes::from_static(b"{\"a\":1}"));
        Ok(())
    }

    #[tokio::test]
    async fn delivers_payloads_larger_than_a_datagram() -> anyhow::Result<()> {
        let group = SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 124), 4639);
        let broker = MulticastBroker::new(group, MulticastOptions::default()).await?;
        let mut site = broker.subscribe("site").await?;

        let payload: Bytes = (0..8 * MAX_PAYLOAD_SIZE)
            .map(|i| (i % 251) as u8)
            .collect::<Vec<_>>()
            .into();
        broker.publish("site", payload.clone()).await?;
        broker.publish("site", Bytes::from_static(b"after")).await?;

        assert_eq!(site.next().await.unwrap()?, payload);
        assert_eq!(site.next().await.unwrap()?, Bytes::from_static(b"after"));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_oversized_payloads() -> anyhow::Result<()> {
        let group = SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 124), 4638);
        let broker = MulticastBroker::new(group, MulticastOptions::default()).await?;
        let payload = Bytes::from(vec![b'x'; MAX_MESSAGE_SIZE + 1]);
        assert!(matches!(
            broker.publish("site", payload).await,
            Err(BrokerError::Codec(_))
        ));
        Ok(())
    }
}
