use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A logical stream of site-wide state. Each channel has its own
/// [LatestValue](crate::LatestValue), its own broker topic and its own
/// client namespace, all named after [Channel::as_str].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Cumulative site status (e.g. queue lengths).
    Site,
    /// System notices.
    System,
    /// Request/response data namespace.
    Data,
}

/// How a channel is exposed to client connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceKind {
    /// Connections receive every snapshot of the channel.
    Broadcast,
    /// Connections send requests handled by the application.
    Bidirectional,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown channel: {0}")]
pub struct UnknownChannel(pub String);

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Site, Channel::System, Channel::Data];

    /// Topic and namespace name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Site => "site",
            Channel::System => "system",
            Channel::Data => "data",
        }
    }

    pub fn namespace_kind(&self) -> NamespaceKind {
        match self {
            Channel::Site | Channel::System => NamespaceKind::Broadcast,
            Channel::Data => NamespaceKind::Bidirectional,
        }
    }

    /// Dense index, used for per-channel arrays.
    pub(crate) fn index(&self) -> usize {
        match self {
            Channel::Site => 0,
            Channel::System => 1,
            Channel::Data => 2,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownChannel(s.to_owned()))
    }
}
