//! Per-channel latest-value caches.
//!
//! A [LatestValue] is the single owner of a channel's current snapshot.
//! Everything else in the crate (the relay, the client gateway, in-process
//! consumers) reads it through [subscribe](LatestValue::subscribe) and
//! writes it through [publish](LatestValue::publish) or
//! [update](LatestValue::update).

mod channels;
mod latest_value;
mod subscriber;

pub use channels::ChannelCaches;
pub use latest_value::{LatestValue, Subscription};
pub use subscriber::{on_next, FnSubscriber, Subscriber, SubscriberError, SubscriberResult};
