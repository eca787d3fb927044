//! The [Envelope] is the unit of state exchanged between processes and
//! pushed to clients. It wraps an opaque key/value snapshot with the
//! identity needed for de-duplication and loop prevention.
//!
//! On the wire an envelope is a JSON object:
//!
//! ```json
//! {"id": "...", "channel": "site", "updatedAt": "...", "originId": "...", "data": {}}
//! ```

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::Channel;

/// Opaque snapshot data.
pub type StatusData = Map<String, Value>;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("invalid envelope json: {0}")]
    Json(#[from] serde_json::Error),
}

/// How an envelope reached this process. Never serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Origin {
    /// Produced by a local mutation.
    #[default]
    Local,
    /// Merged in from the broker.
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Regenerated on every data change, never on re-delivery.
    pub id: Uuid,
    pub channel: Channel,
    pub updated_at: DateTime<Utc>,
    /// The process which authored this revision.
    pub origin_id: Uuid,
    #[serde(default)]
    pub data: StatusData,
    #[serde(skip)]
    origin: Origin,
}

impl Envelope {
    /// Wrap `data` in a fresh envelope authored by `origin_id`.
    ///
    /// Every call allocates a new id, even when `data` is unchanged, so
    /// callers must only wrap on a real mutation.
    pub fn wrap(channel: Channel, data: Option<StatusData>, origin_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel,
            updated_at: Utc::now(),
            origin_id,
            data: data.unwrap_or_default(),
            origin: Origin::Local,
        }
    }

    /// A new revision of this envelope with `key` set to `value`. Other
    /// keys are carried over.
    pub fn with_entry(&self, key: impl Into<String>, value: Value, origin_id: Uuid) -> Self {
        let mut data = self.data.clone();
        data.insert(key.into(), value);
        Self::wrap(self.channel, Some(data), origin_id)
    }

    /// Merge a remote revision over this one. Inbound keys overwrite local
    /// ones individually; local keys absent from `inbound` survive. The
    /// result takes the inbound identity verbatim and is marked
    /// [Origin::Remote], even when `origin_id` is our own (a late echo).
    pub fn merged_with(&self, inbound: Envelope) -> Self {
        let mut data = self.data.clone();
        data.extend(inbound.data);
        Self {
            id: inbound.id,
            channel: self.channel,
            updated_at: inbound.updated_at,
            origin_id: inbound.origin_id,
            data,
            origin: Origin::Remote,
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn encode(&self) -> Result<Bytes, EnvelopeError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(buf)?)
    }
}
