use std::{error::Error, sync::Arc};

use crate::Envelope;

pub type SubscriberError = Box<dyn Error + Send + Sync>;
pub type SubscriberResult = Result<(), SubscriberError>;

/// Receives the snapshots of a [LatestValue](super::LatestValue).
///
/// Errors returned (and panics raised) by a subscriber are logged and never
/// reach other subscribers.
pub trait Subscriber: Send + Sync {
    fn on_next(&self, envelope: &Arc<Envelope>) -> SubscriberResult;

    /// A non-terminal failure upstream of the cache (e.g. a lost broker).
    fn on_error(&self, _error: &SubscriberError) {}

    fn on_complete(&self) {}
}

/// Adapts three closures into a [Subscriber].
pub struct FnSubscriber<N, E, C> {
    on_next: N,
    on_error: E,
    on_complete: C,
}

impl<N, E, C> FnSubscriber<N, E, C>
where
    N: Fn(&Arc<Envelope>) -> SubscriberResult + Send + Sync,
    E: Fn(&SubscriberError) + Send + Sync,
    C: Fn() + Send + Sync,
{
    pub fn new(on_next: N, on_error: E, on_complete: C) -> Self {
        Self {
            on_next,
            on_error,
            on_complete,
        }
    }
}

impl<N, E, C> Subscriber for FnSubscriber<N, E, C>
where
    N: Fn(&Arc<Envelope>) -> SubscriberResult + Send + Sync,
    E: Fn(&SubscriberError) + Send + Sync,
    C: Fn() + Send + Sync,
{
    fn on_next(&self, envelope: &Arc<Envelope>) -> SubscriberResult {
        (self.on_next)(envelope)
    }

    fn on_error(&self, error: &SubscriberError) {
        (self.on_error)(error)
    }

    fn on_complete(&self) {
        (self.on_complete)()
    }
}

/// Shorthand for a subscriber which only cares about snapshots.
pub fn on_next<N>(f: N) -> impl Subscriber
where
    N: Fn(&Arc<Envelope>) -> SubscriberResult + Send + Sync,
{
    FnSubscriber::new(f, |_: &SubscriberError| {}, || {})
}
