use std::{
    collections::{HashMap, VecDeque},
    hash::Hash,
};

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::{
    codec::{CodecError, Frame},
    constants::{FRAGMENT_HEADER_SIZE, MAX_MESSAGE_SIZE, MAX_PAYLOAD_SIZE, MAX_TOPIC_LEN},
};

/// Incomplete messages kept per [Reassembler] before the oldest is dropped.
const DEFAULT_PENDING_MESSAGES: usize = 32;

/// A whole payload for a topic, before splitting or after reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
}

/// Split `payload` into frames which each fit one datagram. An empty
/// payload still yields one frame.
pub fn split(topic: &str, message_id: u64, payload: Bytes) -> Result<Vec<Frame>, CodecError> {
    if topic.len() > MAX_TOPIC_LEN {
        return Err(CodecError::TopicTooLong(topic.len()));
    }
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(CodecError::TooLarge(payload.len()));
    }
    let chunk = MAX_PAYLOAD_SIZE - 1 - topic.len() - FRAGMENT_HEADER_SIZE;
    let count = payload.len().div_ceil(chunk).max(1);
    Ok((0..count)
        .map(|index| {
            let start = (index * chunk).min(payload.len());
            let end = (start + chunk).min(payload.len());
            Frame {
                topic: topic.to_owned(),
                message_id,
                index: index as u16,
                count: count as u16,
                payload: payload.slice(start..end),
            }
        })
        .collect())
}

struct Partial {
    topic: String,
    parts: Vec<Option<Bytes>>,
    missing: usize,
}

impl Partial {
    fn new(frame: &Frame) -> Self {
        Self {
            topic: frame.topic.clone(),
            parts: vec![None; frame.count as usize],
            missing: frame.count as usize,
        }
    }

    fn matches(&self, frame: &Frame) -> bool {
        self.parts.len() == frame.count as usize && self.topic == frame.topic
    }

    fn into_message(self) -> Message {
        let mut payload = BytesMut::new();
        for part in self.parts.into_iter().flatten() {
            payload.extend_from_slice(&part);
        }
        Message {
            topic: self.topic,
            payload: payload.freeze(),
        }
    }
}

/// Joins fragments back into messages, per sender `K`.
///
/// Datagrams may be lost or reordered. A message missing a fragment is
/// never delivered; it is dropped once newer messages push it out.
pub struct Reassembler<K> {
    pending: HashMap<(K, u64), Partial>,
    order: VecDeque<(K, u64)>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone> Default for Reassembler<K> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_PENDING_MESSAGES)
    }
}

impl<K: Hash + Eq + Clone> Reassembler<K> {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Incomplete messages currently held.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Accept one fragment from `source`, returning the message it
    /// completes.
    pub fn push(&mut self, source: K, frame: Frame) -> Option<Message> {
        if frame.count == 1 {
            return Some(Message {
                topic: frame.topic,
                payload: frame.payload,
            });
        }
        let key = (source, frame.message_id);
        if self.pending.get(&key).is_some_and(|p| !p.matches(&frame)) {
            debug!(message = frame.message_id, "Fragment disagrees with earlier ones, restarting");
            self.forget(&key);
        }
        if !self.pending.contains_key(&key) {
            while self.pending.len() >= self.capacity {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                if let Some(dropped) = self.pending.remove(&oldest) {
                    debug!(
                        message = oldest.1,
                        missing = dropped.missing,
                        "Dropping incomplete message"
                    );
                }
            }
            self.pending.insert(key.clone(), Partial::new(&frame));
            self.order.push_back(key.clone());
        }

        let partial = self.pending.get_mut(&key)?;
        let slot = partial.parts.get_mut(frame.index as usize)?;
        if slot.is_some() {
            trace!(message = frame.message_id, index = frame.index, "Duplicate fragment");
            return None;
        }
        *slot = Some(frame.payload);
        partial.missing -= 1;
        if partial.missing > 0 {
            return None;
        }
        let complete = self.pending.remove(&key)?;
        self.order.retain(|k| k != &key);
        Some(complete.into_message())
    }

    fn forget(&mut self, key: &(K, u64)) {
        self.pending.remove(key);
        self.order.retain(|k| k != key);
    }
}
