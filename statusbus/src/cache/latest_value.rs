use std::{
    collections::VecDeque,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock,
    },
    thread::{self, ThreadId},
};

use tracing::{error, trace, warn};
use uuid::Uuid;

use crate::{
    cache::{Subscriber, SubscriberError},
    Channel, Envelope,
};

/// Handle returned by [LatestValue::subscribe].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    channel: Channel,
    id: u64,
}

impl Subscription {
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

struct Entry {
    id: u64,
    /// Cleared by `unsubscribe`, checked before every delivery.
    active: AtomicBool,
    subscriber: Arc<dyn Subscriber>,
}

#[derive(Default)]
struct Delivery {
    completed: bool,
    /// The thread currently running subscriber callbacks.
    owner: Option<ThreadId>,
    /// Envelopes published from inside a callback, delivered by the owner
    /// once its current round is over.
    pending: VecDeque<Arc<Envelope>>,
}

/// A replay-1 broadcast for one channel: it always holds exactly one
/// current [Envelope], hands it to every new subscriber immediately and
/// then streams each later publish, in publish order.
///
/// One thread at a time delivers; others wait for their turn. Callbacks may
/// publish, subscribe, unsubscribe and read the
/// [snapshot](LatestValue::snapshot). A publish from a callback becomes
/// current at once and is delivered to everyone after the envelope being
/// delivered, so every subscriber still sees publish order.
pub struct LatestValue {
    channel: Channel,
    current: RwLock<Arc<Envelope>>,
    delivery: Mutex<Delivery>,
    idle: Condvar,
    subscribers: Mutex<Vec<Arc<Entry>>>,
    next_id: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LatestValue {
    /// Create a cache holding an empty envelope authored by `origin_id`.
    pub fn new(channel: Channel, origin_id: Uuid) -> Self {
        Self {
            channel,
            current: RwLock::new(Arc::new(Envelope::wrap(channel, None, origin_id))),
            delivery: Default::default(),
            idle: Condvar::new(),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// The current envelope.
    pub fn snapshot(&self) -> Arc<Envelope> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Replace the current envelope and notify every subscriber. Returns
    /// `None` if the envelope belongs to another channel or the cache has
    /// completed.
    pub fn publish(&self, envelope: Envelope) -> Option<Arc<Envelope>> {
        if envelope.channel != self.channel {
            warn!(
                channel = %self.channel,
                other = %envelope.channel,
                "Refusing to publish an envelope for another channel"
            );
            return None;
        }
        self.update(|_| Some(envelope))
    }

    /// Atomically derive the next envelope from the current one and
    /// publish it. `f` returning `None` leaves the cache untouched and
    /// notifies nobody. `f` must not call back into this cache.
    pub fn update<F>(&self, f: F) -> Option<Arc<Envelope>>
    where
        F: FnOnce(&Envelope) -> Option<Envelope>,
    {
        let me = thread::current().id();
        let mut delivery = lock(&self.delivery);
        let nested = delivery.owner == Some(me);
        if !nested {
            delivery = self.wait_turn(delivery);
        }
        if delivery.completed {
            warn!(channel = %self.channel, "Publish after completion ignored");
            return None;
        }
        let next = Arc::new(f(&self.snapshot())?);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&next);
        if nested {
            trace!(channel = %self.channel, id = %next.id, "Queued publish from a callback");
            delivery.pending.push_back(Arc::clone(&next));
            return Some(next);
        }
        delivery.owner = Some(me);
        drop(delivery);

        self.notify(&next);
        self.finish_turn();
        Some(next)
    }

    /// Register `subscriber` and hand it the current envelope before
    /// returning. After completion the subscriber only sees `on_complete`.
    pub fn subscribe(&self, subscriber: impl Subscriber + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Subscription {
            channel: self.channel,
            id,
        };
        let subscriber: Arc<dyn Subscriber> = Arc::new(subscriber);

        // owning the turn means no publish can slip between the replay and
        // the registration
        let me = thread::current().id();
        let mut delivery = lock(&self.delivery);
        let nested = delivery.owner == Some(me);
        if !nested {
            delivery = self.wait_turn(delivery);
        }
        if delivery.completed {
            drop(delivery);
            subscriber.on_complete();
            return handle;
        }
        let entry = Arc::new(Entry {
            id,
            active: AtomicBool::new(true),
            subscriber,
        });
        lock(&self.subscribers).push(Arc::clone(&entry));

        if nested {
            // queued publishes will reach the new entry, the last of them
            // being the current envelope
            let replay = delivery.pending.is_empty();
            drop(delivery);
            if replay {
                self.deliver(&entry, &self.snapshot());
            }
            return handle;
        }
        delivery.owner = Some(me);
        drop(delivery);

        self.deliver(&entry, &self.snapshot());
        self.finish_turn();
        handle
    }

    /// Remove a subscriber. No delivery to it starts after this returns.
    /// Safe to call from inside a callback.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut subscribers = lock(&self.subscribers);
        match subscribers.iter().position(|e| e.id == subscription.id) {
            Some(idx) => {
                let entry = subscribers.remove(idx);
                entry.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Tell subscribers about an upstream failure. The cache keeps serving.
    pub fn notify_error(&self, err: &SubscriberError) {
        for entry in self.active_entries() {
            if catch_unwind(AssertUnwindSafe(|| entry.subscriber.on_error(err))).is_err() {
                error!(channel = %self.channel, subscriber = entry.id, "Subscriber panicked in on_error");
            }
        }
    }

    /// Terminal: drop every subscriber after calling `on_complete`. Queued
    /// publishes are discarded.
    pub fn complete(&self) {
        let me = thread::current().id();
        let mut delivery = lock(&self.delivery);
        if delivery.owner != Some(me) {
            delivery = self.wait_turn(delivery);
        }
        if delivery.completed {
            return;
        }
        delivery.completed = true;
        delivery.pending.clear();
        let entries = std::mem::take(&mut *lock(&self.subscribers));
        drop(delivery);

        for entry in entries {
            entry.active.store(false, Ordering::Release);
            if catch_unwind(AssertUnwindSafe(|| entry.subscriber.on_complete())).is_err() {
                error!(channel = %self.channel, subscriber = entry.id, "Subscriber panicked in on_complete");
            }
        }
    }

    fn wait_turn<'a>(&self, mut delivery: MutexGuard<'a, Delivery>) -> MutexGuard<'a, Delivery> {
        while delivery.owner.is_some() {
            delivery = self
                .idle
                .wait(delivery)
                .unwrap_or_else(PoisonError::into_inner);
        }
        delivery
    }

    /// Deliver whatever callbacks queued during the turn, then hand the
    /// turn to the next waiting thread.
    fn finish_turn(&self) {
        loop {
            let mut delivery = lock(&self.delivery);
            let next = if delivery.completed {
                delivery.pending.clear();
                None
            } else {
                delivery.pending.pop_front()
            };
            match next {
                Some(envelope) => {
                    drop(delivery);
                    self.notify(&envelope);
                }
                None => {
                    delivery.owner = None;
                    drop(delivery);
                    self.idle.notify_all();
                    return;
                }
            }
        }
    }

    fn active_entries(&self) -> Vec<Arc<Entry>> {
        lock(&self.subscribers).clone()
    }

    fn notify(&self, envelope: &Arc<Envelope>) {
        for entry in self.active_entries() {
            self.deliver(&entry, envelope);
        }
    }

    fn deliver(&self, entry: &Entry, envelope: &Arc<Envelope>) {
        if !entry.active.load(Ordering::Acquire) {
            trace!(channel = %self.channel, subscriber = entry.id, "Skipping unsubscribed");
            return;
        }
        match catch_unwind(AssertUnwindSafe(|| entry.subscriber.on_next(envelope))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(
                channel = %self.channel,
                id = %envelope.id,
                subscriber = entry.id,
                "Subscriber failed: {e}"
            ),
            Err(_) => error!(
                channel = %self.channel,
                id = %envelope.id,
                subscriber = entry.id,
                "Subscriber panicked"
            ),
        }
    }
}
