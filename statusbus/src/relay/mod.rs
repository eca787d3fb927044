//! A [Relay] bridges one channel's [LatestValue] to the broker topic of the
//! same name.
//!
//! - Outbound: every envelope produced by a local mutation (`origin_id` is
//! ours and it did not arrive through the broker) with non-empty data is
//! serialized and published, in publish order. The empty startup snapshot
//! is never published.
//! - Inbound: every payload from the topic goes through [apply_inbound].
//!
//! Broker failures are logged and leave the process serving local state
//! only. Nothing here panics or tears the process down.

mod inbound;

use std::sync::Arc;

pub use inbound::{apply_inbound, InboundOutcome};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::{
    broker::{Broker, BrokerStream},
    cache::{on_next, Subscription},
    Channel, Envelope, LatestValue, Origin,
};

/// A running relay. Dropping it stops both directions.
pub struct Relay {
    channel: Channel,
    cache: Arc<LatestValue>,
    subscription: Subscription,
    cancel: CancellationToken,
}

impl Relay {
    /// Subscribe to the broker topic and to the cache, then spawn the
    /// inbound and outbound tasks. Must be called within a tokio runtime.
    ///
    /// A failed broker subscription is logged and reported to the cache's
    /// subscribers through `on_error`; the outbound side still runs.
    pub async fn start(
        cache: Arc<LatestValue>,
        broker: Arc<dyn Broker>,
        process_id: Uuid,
        cancel: CancellationToken,
    ) -> Self {
        let channel = cache.channel();

        match broker.subscribe(channel.as_str()).await {
            Ok(stream) => {
                tokio::spawn(inbound_loop(Arc::clone(&cache), stream, cancel.clone()));
            }
            Err(e) => {
                error!(%channel, "Failed to subscribe to broker, serving local state only: {e}");
                cache.notify_error(&e.into());
            }
        }

        let (tx, rx) = mpsc::unbounded_channel::<Arc<Envelope>>();
        tokio::spawn(outbound_loop(channel, broker, rx, cancel.clone()));
        let subscription = cache.subscribe(on_next(move |envelope| {
            let authored_here =
                envelope.origin() == Origin::Local && envelope.origin_id == process_id;
            if !authored_here || envelope.is_empty() {
                return Ok(());
            }
            if tx.send(Arc::clone(envelope)).is_err() {
                trace!(%channel, id = %envelope.id, "Outbound relay stopped");
            }
            Ok(())
        }));
        debug!(%channel, %process_id, "Relay started");

        Self {
            channel,
            cache,
            subscription,
            cancel,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.cache.unsubscribe(&self.subscription);
        self.cancel.cancel();
        debug!(channel = %self.channel, "Relay stopped");
    }
}

async fn outbound_loop(
    channel: Channel,
    broker: Arc<dyn Broker>,
    mut rx: mpsc::UnboundedReceiver<Arc<Envelope>>,
    cancel: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let payload = match envelope.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(%channel, id = %envelope.id, "Failed to encode envelope: {e}");
                continue;
            }
        };
        match broker.publish(channel.as_str(), payload).await {
            Ok(()) => trace!(%channel, id = %envelope.id, "Published envelope"),
            Err(e) => error!(%channel, id = %envelope.id, "Failed to publish envelope: {e}"),
        }
    }
}

async fn inbound_loop(cache: Arc<LatestValue>, mut stream: BrokerStream, cancel: CancellationToken) {
    let channel = cache.channel();
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = stream.next() => item,
        };
        match item {
            Some(Ok(payload)) => {
                apply_inbound(&cache, &payload);
            }
            Some(Err(e)) => error!(%channel, "Broker receive error: {e}"),
            None => {
                error!(%channel, "Broker feed ended, serving local state only");
                cache.notify_error(&"broker feed ended".into());
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::broker::MemoryBroker;

    async fn settle() {
        sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn publishes_local_changes_once() {
        let broker = Arc::new(MemoryBroker::new());
        let process = Uuid::new_v4();
        let cache = Arc::new(LatestValue::new(Channel::Site, process));
        let _relay = Relay::start(
            Arc::clone(&cache),
            broker.clone(),
            process,
            CancellationToken::new(),
        )
        .await;

        cache.update(|c| Some(c.with_entry("x", json!(1), process)));
        settle().await;

        // the echo came back through the broker and was discarded
        assert_eq!(broker.published_count("site").await, 1);
        assert_eq!(cache.snapshot().data["x"], json!(1));
    }

    #[tokio::test]
    async fn empty_startup_snapshot_is_not_published() {
        let broker = Arc::new(MemoryBroker::new());
        let process = Uuid::new_v4();
        let cache = Arc::new(LatestValue::new(Channel::Site, process));
        let _relay =
            Relay::start(cache, broker.clone(), process, CancellationToken::new()).await;
        settle().await;
        assert!(broker.published().await.is_empty());
    }

    #[tokio::test]
    async fn remote_changes_are_applied_not_republished() {
        let broker = Arc::new(MemoryBroker::new());
        let process = Uuid::new_v4();
        let cache = Arc::new(LatestValue::new(Channel::Site, process));
        let _relay = Relay::start(
            Arc::clone(&cache),
            broker.clone(),
            process,
            CancellationToken::new(),
        )
        .await;

        let remote = Envelope::wrap(
            Channel::Site,
            json!({"queueLength": 5}).as_object().cloned(),
            Uuid::new_v4(),
        );
        broker
            .publish("site", remote.encode().unwrap())
            .await
            .unwrap();

        timeout(Duration::from_secs(1), async {
            while cache.snapshot().id != remote.id {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        settle().await;
        assert_eq!(broker.published_count("site").await, 1);
    }

    #[tokio::test]
    async fn late_echo_is_not_republished() {
        let broker = Arc::new(MemoryBroker::new());
        let process = Uuid::new_v4();
        let cache = Arc::new(LatestValue::new(Channel::Site, process));
        let _relay = Relay::start(
            Arc::clone(&cache),
            broker.clone(),
            process,
            CancellationToken::new(),
        )
        .await;

        let ours = cache
            .update(|c| Some(c.with_entry("a", json!(1), process)))
            .unwrap();
        let theirs = Envelope::wrap(
            Channel::Site,
            json!({"b": 2}).as_object().cloned(),
            Uuid::new_v4(),
        );
        broker
            .publish("site", theirs.encode().unwrap())
            .await
            .unwrap();
        // our own envelope again, after a remote one overtook it
        broker
            .publish("site", ours.encode().unwrap())
            .await
            .unwrap();

        timeout(Duration::from_secs(1), async {
            while cache.snapshot().id != ours.id {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        settle().await;
        assert_eq!(cache.snapshot().origin(), Origin::Remote);
        assert_eq!(cache.snapshot().data.len(), 2);
        assert_eq!(broker.published_count("site").await, 3);
    }

    #[tokio::test]
    async fn offline_broker_degrades_to_local() {
        let broker = Arc::new(MemoryBroker::new());
        broker.set_offline(true);
        let process = Uuid::new_v4();
        let cache = Arc::new(LatestValue::new(Channel::Site, process));
        let _relay = Relay::start(
            Arc::clone(&cache),
            broker.clone(),
            process,
            CancellationToken::new(),
        )
        .await;

        let sent = cache
            .update(|c| Some(c.with_entry("x", json!(1), process)))
            .unwrap();
        settle().await;
        assert_eq!(cache.snapshot().id, sent.id);
        assert!(broker.published().await.is_empty());
    }

    #[tokio::test]
    async fn drop_unsubscribes_from_cache() {
        let broker = Arc::new(MemoryBroker::new());
        let process = Uuid::new_v4();
        let cache = Arc::new(LatestValue::new(Channel::Site, process));
        let relay = Relay::start(
            Arc::clone(&cache),
            broker.clone(),
            process,
            CancellationToken::new(),
        )
        .await;
        assert_eq!(cache.subscriber_count(), 1);
        drop(relay);
        assert_eq!(cache.subscriber_count(), 0);

        cache.update(|c| Some(c.with_entry("x", json!(1), process)));
        settle().await;
        assert!(broker.published().await.is_empty());
    }
}
