use bytes::{BufMut, BytesMut};
use tokio_util::codec;

use crate::{
    codec::{CodecError, Frame},
    constants::{FRAGMENT_HEADER_SIZE, HEADER_SIZE, MAX_PAYLOAD_SIZE, MAX_TOPIC_LEN},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Encoder;

impl codec::Encoder<Frame> for Encoder {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let topic = item.topic.as_bytes();
        if topic.len() > MAX_TOPIC_LEN {
            return Err(CodecError::TopicTooLong(topic.len()));
        }
        if item.count == 0 || item.index >= item.count {
            return Err(CodecError::BadFragment {
                index: item.index,
                count: item.count,
            });
        }
        let len = 1 + topic.len() + FRAGMENT_HEADER_SIZE + item.payload.len();
        if len > MAX_PAYLOAD_SIZE {
            return Err(CodecError::TooLarge(len));
        }
        dst.reserve(HEADER_SIZE + len);
        // forward-compatible compression flag
        dst.put_u8(0);
        dst.put_u16(len as u16);
        dst.put_u8(topic.len() as u8);
        dst.put_slice(topic);
        dst.put_u64(item.message_id);
        dst.put_u16(item.index);
        dst.put_u16(item.count);
        dst.put_slice(&item.payload);
        Ok(())
    }
}
