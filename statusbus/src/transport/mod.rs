//! Sockets joined to a multicast group, used as the shared medium between
//! worker processes on a private network.

mod multicast;

pub use multicast::{
    bind_multicast, connect_multicast, MulticastOptions, MulticastSocketError,
    MulticastSocketResult,
};
