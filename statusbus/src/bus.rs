//! [StatusBus] is the public interface to the status bus. Application code
//! sends and subscribes through it and never touches the caches, relays or
//! gateway wiring directly.
//!
//! A bus owns one [LatestValue] per [Channel] from the moment it is
//! constructed, so sends and subscriptions work before
//! [init](StatusBus::init). `init` connects the relays to the broker and
//! builds the client [Gateway]; calling it again is a no-op.
//!
//! Upon dropping a [StatusBus], every background task is cancelled.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    broker::Broker,
    cache::{ChannelCaches, FnSubscriber, Subscriber, SubscriberError, SubscriberResult, Subscription},
    gateway::{Authorizer, Gateway, SessionAuthorizer, SessionMiddleware},
    relay::Relay,
    BusConfig, BusError, BusResult, Channel, Envelope,
};

/// State that only exists once [StatusBus::init] has run.
struct Running {
    gateway: Arc<Gateway>,
    relays: Mutex<Vec<Relay>>,
}

pub struct StatusBus {
    config: BusConfig,
    caches: Arc<ChannelCaches>,
    authorizer: Arc<dyn Authorizer>,
    running: OnceCell<Running>,
    cancel: CancellationToken,
}

impl StatusBus {
    /// A bus gating clients with [SessionAuthorizer].
    pub fn new(config: BusConfig) -> Self {
        Self::with_authorizer(config, Arc::new(SessionAuthorizer))
    }

    pub fn with_authorizer(config: BusConfig, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            caches: Arc::new(ChannelCaches::new(config.process_id)),
            config,
            authorizer,
            running: OnceCell::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn process_id(&self) -> Uuid {
        self.config.process_id
    }

    pub fn is_initialized(&self) -> bool {
        self.running.initialized()
    }

    /// Start a relay per channel over `broker` and build the gateway around
    /// `middleware`. Only the first call does anything; later calls return
    /// the gateway built by the first. Must be called within a tokio
    /// runtime.
    pub async fn init(
        &self,
        broker: Arc<dyn Broker>,
        middleware: Arc<dyn SessionMiddleware>,
    ) -> Arc<Gateway> {
        if let Some(running) = self.running.get() {
            debug!(process_id = %self.process_id(), "Status bus already initialized");
            return Arc::clone(&running.gateway);
        }
        let running = self
            .running
            .get_or_init(|| async move {
                let gateway = Arc::new(Gateway::new(
                    self.config.root_path.clone(),
                    Arc::clone(&self.caches),
                    middleware,
                    Arc::clone(&self.authorizer),
                ));
                let mut relays = Vec::with_capacity(Channel::ALL.len());
                for cache in self.caches.iter() {
                    relays.push(
                        Relay::start(
                            Arc::clone(cache),
                            Arc::clone(&broker),
                            self.process_id(),
                            self.cancel.child_token(),
                        )
                        .await,
                    );
                }
                info!(process_id = %self.process_id(), "Status bus initialized");
                Running {
                    gateway,
                    relays: Mutex::new(relays),
                }
            })
            .await;
        Arc::clone(&running.gateway)
    }

    /// The client gateway, once initialized.
    pub fn gateway(&self) -> BusResult<Arc<Gateway>> {
        self.running
            .get()
            .map(|running| Arc::clone(&running.gateway))
            .ok_or(BusError::NotInitialized)
    }

    /// Set `key` in the cumulative site status and broadcast the result.
    /// Returns the id of the new snapshot.
    pub fn send_site(&self, key: impl Into<String>, value: impl Into<Value>) -> BusResult<Uuid> {
        let process_id = self.process_id();
        let key = key.into();
        let value = value.into();
        self.caches
            .get(Channel::Site)
            .update(|current| Some(current.with_entry(key, value, process_id)))
            .map(|envelope| envelope.id)
            .ok_or_else(|| {
                warn!(channel = %Channel::Site, "Send after shutdown");
                BusError::ShutDown
            })
    }

    /// Not implemented: no merge policy exists for the system channel.
    pub fn send_system(&self, key: impl Into<String>, _value: impl Into<Value>) -> BusResult<Uuid> {
        Self::unimplemented(Channel::System, key.into())
    }

    /// Not implemented: no merge policy exists for the data channel.
    pub fn send_data(&self, key: impl Into<String>, _value: impl Into<Value>) -> BusResult<Uuid> {
        Self::unimplemented(Channel::Data, key.into())
    }

    fn unimplemented(channel: Channel, key: String) -> BusResult<Uuid> {
        error!(%channel, key = %key, "Sending is not implemented for this channel");
        Err(BusError::Unimplemented(channel))
    }

    /// Subscribe to site status. `on_next` runs once with the current
    /// snapshot before this returns.
    pub fn subscribe_site<N, E, C>(&self, on_next: N, on_error: E, on_complete: C) -> Subscription
    where
        N: Fn(&Arc<Envelope>) -> SubscriberResult + Send + Sync + 'static,
        E: Fn(&SubscriberError) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        self.subscribe(Channel::Site, FnSubscriber::new(on_next, on_error, on_complete))
    }

    pub fn unsubscribe_site(&self, subscription: &Subscription) -> bool {
        self.unsubscribe(subscription)
    }

    pub fn subscribe(&self, channel: Channel, subscriber: impl Subscriber + 'static) -> Subscription {
        self.caches.get(channel).subscribe(subscriber)
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.caches.get(subscription.channel()).unsubscribe(subscription)
    }

    pub fn snapshot(&self, channel: Channel) -> Arc<Envelope> {
        self.caches.get(channel).snapshot()
    }

    /// A token cancelled when the bus shuts down, for tasks serving it.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Stop the relays and complete every channel. Subscribers receive
    /// `on_complete` and later sends fail with [BusError::ShutDown].
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(running) = self.running.get() {
            running
                .relays
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
        for cache in self.caches.iter() {
            cache.complete();
        }
        info!(process_id = %self.process_id(), "Status bus shut down");
    }
}

impl Drop for StatusBus {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
