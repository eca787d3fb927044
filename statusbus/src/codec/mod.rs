//! Datagram framing for the multicast broker.
//!
//! Every datagram carries a future compatible compression flag (always
//! zero for now) and a body size (n). The next n bytes hold a one byte
//! topic length, the topic itself, a fragment header (message id, index,
//! count) and then a chunk of the opaque payload (a JSON
//! [Envelope](crate::Envelope) in practice).
//!
//! Payloads larger than one datagram are [split] into several frames
//! sharing a message id and joined again by a [Reassembler].

mod decoder;
mod encoder;
mod fragment;

use std::io;

use bytes::Bytes;
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use fragment::{split, Message, Reassembler};
use thiserror::Error;

/// One datagram's worth of a payload addressed to a broker topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub topic: String,
    /// Shared by every fragment of one message from one sender.
    pub message_id: u64,
    pub index: u16,
    pub count: u16,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("message too large: {0} bytes")]
    TooLarge(usize),
    #[error("topic too long: {0} bytes")]
    TopicTooLong(usize),
    #[error("compression not supported: found {0}")]
    Compression(u8),
    #[error("truncated frame")]
    Truncated,
    #[error("truncated topic")]
    TruncatedTopic,
    #[error("truncated fragment header")]
    TruncatedFragment,
    #[error("invalid fragment {index} of {count}")]
    BadFragment { index: u16, count: u16 },
    #[error("topic is not utf-8")]
    TopicEncoding(#[from] std::string::FromUtf8Error),
    #[error("io error")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio_util::codec::{Decoder as _, Encoder as _};

    use super::*;
    use crate::constants::{FRAGMENT_HEADER_SIZE, HEADER_SIZE, MAX_PAYLOAD_SIZE};

    fn frame(topic: &str, payload: &[u8]) -> Frame {
        Frame {
            topic: topic.into(),
            message_id: 0x0102,
            index: 0,
            count: 1,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn encodes_header_topic_then_fragment() {
        let mut buf = BytesMut::new();
        Encoder.encode(frame("site", b"{}"), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 1 + 4 + FRAGMENT_HEADER_SIZE + 2);
        assert_eq!(&buf[..3], &[0, 0, 19]);
        assert_eq!(buf[3], 4);
        assert_eq!(&buf[4..8], b"site");
        assert_eq!(&buf[8..16], &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(&buf[16..20], &[0, 0, 0, 1]);
        assert_eq!(&buf[20..], b"{}");
    }

    #[test]
    fn decodes_what_it_encodes() {
        let mut buf = BytesMut::new();
        Encoder.encode(frame("site", b"abc"), &mut buf).unwrap();
        let decoded = Decoder::new().decode(&mut buf).unwrap();
        assert_eq!(decoded, Some(frame("site", b"abc")));
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_a_full_body() {
        let mut full = BytesMut::new();
        Encoder.encode(frame("data", b"0123456789"), &mut full).unwrap();
        let mut decoder = Decoder::new();
        let mut partial = full.split_to(6);
        assert_eq!(decoder.decode(&mut partial).unwrap(), None);
        partial.unsplit(full);
        assert_eq!(
            decoder.decode(&mut partial).unwrap(),
            Some(frame("data", b"0123456789"))
        );
    }

    #[test]
    fn rejects_oversized_messages() {
        let payload = vec![b'x'; MAX_PAYLOAD_SIZE];
        let mut buf = BytesMut::new();
        assert!(matches!(
            Encoder.encode(frame("site", &payload), &mut buf),
            Err(CodecError::TooLarge(_))
        ));
    }

    #[test]
    fn rejects_inconsistent_fragments() {
        let mut bad = frame("site", b"x");
        bad.index = 2;
        bad.count = 2;
        assert!(matches!(
            Encoder.encode(bad, &mut BytesMut::new()),
            Err(CodecError::BadFragment { index: 2, count: 2 })
        ));

        // a valid header claiming zero fragments
        let mut buf = BytesMut::new();
        Encoder.encode(frame("site", b""), &mut buf).unwrap();
        let count_at = buf.len() - 2;
        buf[count_at + 1] = 0;
        assert!(matches!(
            Decoder::new().decode(&mut buf),
            Err(CodecError::BadFragment { count: 0, .. })
        ));
    }

    #[test]
    fn rejects_missing_fragment_header() {
        // body holds only the topic
        let mut buf = BytesMut::from(&[0u8, 0, 5, 4, b's', b'i', b't', b'e'][..]);
        assert!(matches!(
            Decoder::new().decode(&mut buf),
            Err(CodecError::TruncatedFragment)
        ));
    }

    #[test]
    fn rejects_compressed_frames() {
        let mut buf = BytesMut::from(&[1u8, 0, 1, 0][..]);
        assert!(matches!(
            Decoder::new().decode(&mut buf),
            Err(CodecError::Compression(1))
        ));
    }

    #[test]
    fn truncated_datagrams_reset_the_decoder() {
        let mut full = BytesMut::new();
        Encoder.encode(frame("site", b"payload"), &mut full).unwrap();
        let mut decoder = Decoder::new();
        let mut partial = full.split_to(5);
        assert!(matches!(
            decoder.decode_eof(&mut partial),
            Err(CodecError::Truncated)
        ));
        let mut next = BytesMut::new();
        Encoder.encode(frame("site", b"ok"), &mut next).unwrap();
        assert_eq!(
            decoder.decode_eof(&mut next).unwrap(),
            Some(frame("site", b"ok"))
        );
    }

    #[test]
    fn rejects_truncated_topics() {
        // body of 2 bytes claims a 9 byte topic
        let mut buf = BytesMut::from(&[0u8, 0, 2, 9, b's'][..]);
        assert!(matches!(
            Decoder::new().decode(&mut buf),
            Err(CodecError::TruncatedTopic)
        ));
    }
}
