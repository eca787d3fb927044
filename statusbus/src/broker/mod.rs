//! # The broker seam
//!
//! Worker processes converge on the same latest value by exchanging
//! serialized [Envelope](crate::Envelope)s over a publish/subscribe broker,
//! one topic per [Channel](crate::Channel).
//!
//! A broker is expected to deliver a process's own publishes back to it
//! when it is subscribed to the same topic. The relay de-duplicates those
//! echoes by envelope id.
//!
//! Two brokers ship with the crate:
//!
//! - [MemoryBroker]: in-process, shared by several buses to stand in for
//! several worker processes. Records every publish and can be switched
//! offline to simulate an outage.
//! - [MulticastBroker]: one UDP multicast group shared by every process on
//! a private network.

mod memory;
mod multicast;

use std::{io, pin::Pin};

use bytes::Bytes;
pub use memory::MemoryBroker;
pub use multicast::MulticastBroker;
use thiserror::Error;
use tokio_stream::Stream;

use crate::{codec::CodecError, transport::MulticastSocketError};

/// Inbound payloads for one topic.
pub type BrokerStream = Pin<Box<dyn Stream<Item = Result<Bytes, BrokerError>> + Send>>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("subscriber lagged, {0} messages skipped")]
    Lagged(u64),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("socket error: {0}")]
    Socket(#[from] MulticastSocketError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[async_trait::async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Publish `payload` to every subscriber of `topic`, including
    /// subscribers in this process.
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError>;

    /// Stream every payload subsequently published to `topic`.
    async fn subscribe(&self, topic: &str) -> Result<BrokerStream, BrokerError>;
}
