use tracing::{error, trace, warn};
use uuid::Uuid;

use crate::{Channel, Envelope, LatestValue};

/// What happened to one payload received from the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Merged into the cache under the inbound id.
    Applied(Uuid),
    /// The cache already holds this id: our own echo or a redelivery.
    Duplicate(Uuid),
    Malformed,
    /// Arrived on our topic but claims another channel.
    WrongChannel(Channel),
    /// Merging is only defined for [Channel::Site].
    Unsupported(Channel),
    /// The cache has completed.
    Closed,
}

/// Decode a broker payload and fold it into `cache`.
///
/// Inbound keys overwrite local keys one by one, local keys the sender
/// never saw survive, and the merged envelope takes the sender's id,
/// timestamp and origin. Because the origin is now the remote process the
/// outbound side never republishes it.
pub fn apply_inbound(cache: &LatestValue, payload: &[u8]) -> InboundOutcome {
    let channel = cache.channel();
    let inbound = match Envelope::decode(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(%channel, "Dropping malformed envelope: {e}");
            return InboundOutcome::Malformed;
        }
    };
    if inbound.channel != channel {
        warn!(
            %channel,
            other = %inbound.channel,
            origin = %inbound.origin_id,
            "Dropping envelope for another channel"
        );
        return InboundOutcome::WrongChannel(inbound.channel);
    }
    if channel != Channel::Site {
        error!(
            %channel,
            origin = %inbound.origin_id,
            "Merging remote envelopes is not implemented for this channel"
        );
        return InboundOutcome::Unsupported(channel);
    }

    let id = inbound.id;
    let origin = inbound.origin_id;
    let mut duplicate = false;
    let applied = cache.update(|current| {
        if current.id == inbound.id {
            duplicate = true;
            None
        } else {
            Some(current.merged_with(inbound))
        }
    });
    match applied {
        Some(_) => {
            trace!(%channel, %id, %origin, "Applied remote envelope");
            InboundOutcome::Applied(id)
        }
        None if duplicate => {
            trace!(%channel, %id, "Discarding duplicate envelope");
            InboundOutcome::Duplicate(id)
        }
        None => InboundOutcome::Closed,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use serde_json::json;

    use super::*;
    use crate::cache::on_next;

    fn remote(channel: Channel, data: serde_json::Value) -> Envelope {
        let data = data.as_object().cloned();
        Envelope::wrap(channel, data, Uuid::new_v4())
    }

    fn counting(cache: &LatestValue) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        cache.subscribe(on_next(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        count
    }

    #[test]
    fn merges_over_local_keys() {
        let local = Uuid::new_v4();
        let cache = LatestValue::new(Channel::Site, local);
        cache.update(|c| Some(c.with_entry("a", json!(1), local)));

        let inbound = remote(Channel::Site, json!({"b": 2}));
        let payload = inbound.encode().unwrap();
        assert_eq!(
            apply_inbound(&cache, &payload),
            InboundOutcome::Applied(inbound.id)
        );
        let snapshot = cache.snapshot();
        assert_eq!(snapshot.data, *json!({"a": 1, "b": 2}).as_object().unwrap());
        assert_eq!(snapshot.id, inbound.id);
        assert_eq!(snapshot.origin_id, inbound.origin_id);
        assert_eq!(snapshot.updated_at, inbound.updated_at);

        let inbound = remote(Channel::Site, json!({"a": 3}));
        apply_inbound(&cache, &inbound.encode().unwrap());
        assert_eq!(
            cache.snapshot().data,
            *json!({"a": 3, "b": 2}).as_object().unwrap()
        );
    }

    #[test]
    fn redelivery_is_idempotent() {
        let cache = LatestValue::new(Channel::Site, Uuid::new_v4());
        let count = counting(&cache);
        let inbound = remote(Channel::Site, json!({"q": 5}));
        let payload = inbound.encode().unwrap();

        assert_eq!(
            apply_inbound(&cache, &payload),
            InboundOutcome::Applied(inbound.id)
        );
        assert_eq!(
            apply_inbound(&cache, &payload),
            InboundOutcome::Duplicate(inbound.id)
        );
        // replay + one application
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn own_echo_is_a_duplicate() {
        let local = Uuid::new_v4();
        let cache = LatestValue::new(Channel::Site, local);
        let sent = cache
            .update(|c| Some(c.with_entry("x", json!(1), local)))
            .unwrap();
        assert_eq!(
            apply_inbound(&cache, &sent.encode().unwrap()),
            InboundOutcome::Duplicate(sent.id)
        );
    }

    #[test]
    fn malformed_and_foreign_payloads_are_dropped() {
        let cache = LatestValue::new(Channel::Site, Uuid::new_v4());
        let before = cache.snapshot().id;
        assert_eq!(apply_inbound(&cache, b"{oops"), InboundOutcome::Malformed);

        let foreign = remote(Channel::System, json!({"a": 1}));
        assert_eq!(
            apply_inbound(&cache, &foreign.encode().unwrap()),
            InboundOutcome::WrongChannel(Channel::System)
        );
        assert_eq!(cache.snapshot().id, before);
    }

    #[test]
    fn non_site_channels_are_not_merged() {
        let cache = LatestValue::new(Channel::System, Uuid::new_v4());
        let before = cache.snapshot().id;
        let inbound = remote(Channel::System, json!({"notice": "hi"}));
        assert_eq!(
            apply_inbound(&cache, &inbound.encode().unwrap()),
            InboundOutcome::Unsupported(Channel::System)
        );
        assert_eq!(cache.snapshot().id, before);
    }

    #[test]
    fn completed_cache_is_closed() {
        let cache = LatestValue::new(Channel::Site, Uuid::new_v4());
        cache.complete();
        let inbound = remote(Channel::Site, json!({"a": 1}));
        assert_eq!(
            apply_inbound(&cache, &inbound.encode().unwrap()),
            InboundOutcome::Closed
        );
    }
}
