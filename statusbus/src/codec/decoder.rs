use bytes::{Buf, BytesMut};
use tokio_util::codec;

use crate::{
    codec::{CodecError, Frame},
    constants::{FRAGMENT_HEADER_SIZE, HEADER_SIZE, MAX_FRAGMENTS},
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum State {
    ReadHeader,
    ReadBody { len: usize },
}

#[derive(Debug)]
pub struct Decoder {
    state: State,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            state: State::ReadHeader,
        }
    }

    fn decode_body(mut body: BytesMut) -> Result<Frame, CodecError> {
        if body.is_empty() {
            return Err(CodecError::TruncatedTopic);
        }
        let topic_len = body.get_u8() as usize;
        if body.len() < topic_len {
            return Err(CodecError::TruncatedTopic);
        }
        let topic = String::from_utf8(body.split_to(topic_len).to_vec())?;
        if body.len() < FRAGMENT_HEADER_SIZE {
            return Err(CodecError::TruncatedFragment);
        }
        let message_id = body.get_u64();
        let index = body.get_u16();
        let count = body.get_u16();
        if count == 0 || index >= count || count > MAX_FRAGMENTS {
            return Err(CodecError::BadFragment { index, count });
        }
        Ok(Frame {
            topic,
            message_id,
            index,
            count,
            payload: body.freeze(),
        })
    }
}

impl codec::Decoder for Decoder {
    type Error = CodecError;
    type Item = Frame;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let State::ReadHeader = self.state {
            if src.remaining() < HEADER_SIZE {
                return Ok(None);
            }
            // don't support compression, but keep the flag in place
            match src.get_u8() {
                0 => {}
                v => return Err(CodecError::Compression(v)),
            };
            let len = src.get_u16() as usize;
            src.reserve(len);
            self.state = State::ReadBody { len };
        }

        if let State::ReadBody { len } = self.state {
            if src.len() < len {
                Ok(None)
            } else {
                self.state = State::ReadHeader;
                Self::decode_body(src.split_to(len)).map(Some)
            }
        } else {
            Ok(None)
        }
    }

    /// Each datagram must hold whole frames. Leftovers are dropped and the
    /// decoder resets, so one bad datagram cannot poison the next.
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() && self.state == State::ReadHeader => Ok(None),
            None => {
                self.state = State::ReadHeader;
                buf.clear();
                Err(CodecError::Truncated)
            }
        }
    }
}
