//! # Statusbus
//!
//! Statusbus shares a small piece of frequently changing "site status"
//! between every worker process of a clustered application server, keeps it
//! eventually consistent through a publish/subscribe broker and fans it out
//! live to authenticated client connections.
//!
//! ## Getting Started
//!
//! Each process owns one [StatusBus]. Application code sends key/value
//! updates and subscribes to the result; the bus takes care of everything
//! else.
//!
//! ``` no_run
//! use std::sync::Arc;
//! use statusbus::{
//!     broker::MulticastBroker, gateway::MemorySessionStore, transport::MulticastOptions,
//!     BusConfig, StatusBus,
//! };
//!
//! # async fn inner() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BusConfig::from_env()?;
//! let broker = MulticastBroker::new(config.multicast_addr, MulticastOptions::default()).await?;
//! let bus = StatusBus::new(config);
//! // connect the relays and build the client gateway
//! let gateway = bus
//!     .init(Arc::new(broker), Arc::new(MemorySessionStore::default()))
//!     .await;
//!
//! // in-process consumers see the current snapshot immediately, then
//! // every later one
//! let subscription = bus.subscribe_site(
//!     |envelope| {
//!         println!("site status is now {:?}", envelope.data);
//!         Ok(())
//!     },
//!     |error| eprintln!("upstream failure: {error}"),
//!     || println!("bus shut down"),
//! );
//!
//! // merged into the cumulative site status and relayed to peers
//! let id = bus.send_site("queueLength", 5)?;
//! # Ok(())
//! # }
//! ```
//!
//! ### How it fits together
//!
//! - Every [Channel] has a [LatestValue]: a replay-1 broadcast which hands
//! its current [Envelope] to each new subscriber and then streams every
//! later one in publish order. Subscribers may send from their callbacks.
//! - A [Relay](relay::Relay) per channel publishes envelopes this process
//! authored to the broker topic named after the channel, and merges
//! envelopes from other processes back in. De-duplication by envelope id
//! and the `originId` check keep echoes from looping.
//! - The [Gateway](gateway::Gateway) exposes channels to client
//! connections by namespace and drops messages for connections whose
//! session is not currently authorized.
//!
//! ## Crate feature flags
//!
//! - `websocket`: A WebSocket transport for the gateway, built on
//! `tokio-tungstenite`. Enabled by default.

pub(crate) mod constants;

pub mod broker;
mod bus;
pub mod cache;
mod channel;
pub mod codec;
pub mod config;
mod envelope;
mod error;
pub mod gateway;
pub mod logging;
pub mod relay;
pub mod transport;

pub use bus::StatusBus;
pub use cache::{LatestValue, Subscription};
pub use channel::{Channel, NamespaceKind, UnknownChannel};
pub use config::{BusConfig, ConfigError};
pub use envelope::{Envelope, EnvelopeError, Origin, StatusData};
pub use error::{BusError, BusResult};
