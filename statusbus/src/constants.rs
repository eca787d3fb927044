use std::mem::size_of;

/// Ethernet MTU; one frame must fit in one unfragmented datagram.
const MTU: usize = 1500;

/// Compression flag followed by the big-endian body length.
pub const HEADER_SIZE: usize = size_of::<u8>() + size_of::<u16>();

/// Largest frame body (topic prefix, topic, fragment header and chunk).
/// Leaves headroom below the MTU for IP and UDP headers.
pub const MAX_PAYLOAD_SIZE: usize = MTU - HEADER_SIZE - 100;

/// Topics are length-prefixed with a single byte.
pub const MAX_TOPIC_LEN: usize = u8::MAX as usize;

/// Message id, fragment index and fragment count.
pub const FRAGMENT_HEADER_SIZE: usize = size_of::<u64>() + 2 * size_of::<u16>();

/// Largest message the multicast broker will split into fragments.
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;

/// Enough fragments for [MAX_MESSAGE_SIZE] even under the longest topic.
pub const MAX_FRAGMENTS: u16 =
    (MAX_MESSAGE_SIZE / (MAX_PAYLOAD_SIZE - 1 - MAX_TOPIC_LEN - FRAGMENT_HEADER_SIZE) + 1) as u16;

/// Default root under which client namespaces are mounted.
pub const DEFAULT_ROOT_PATH: &str = "/status";
