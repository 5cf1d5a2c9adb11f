use prost::{bytes::BufMut, Message as _};
use tracing::{debug, warn};

use super::{proto::MessageMsg, BytesBus, Message, MessageBus, WireError};

/// Length of the big endian length prefix.
const PREFIX_LEN: usize = 2;

#[derive(Debug)]
pub struct ProtoBufEncodingLayer<B: BytesBus> {
    pub bus: B,
}

impl<B: BytesBus> ProtoBufEncodingLayer<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    fn encode<T: prost::Message>(msg: T) -> Result<Vec<u8>, WireError> {
        // The length is a u16 (2 bytes), so we cannot use
        // `encode_length_delimited`, which would write a variable length
        // integer using LEB128.
        let len = msg.encoded_len();
        if len > u16::MAX as usize {
            return Err(WireError::TooLarge(len));
        }

        let mut buf = Vec::with_capacity(PREFIX_LEN + len);
        buf.put_slice(&(len as u16).to_be_bytes());
        msg.encode(&mut buf)?;
        Ok(buf)
    }
}

impl<B: BytesBus> MessageBus for ProtoBufEncodingLayer<B> {
    fn send(&self, msg: Message) -> Result<(), WireError> {
        let buf = Self::encode(MessageMsg::from(&msg)).map_err(|e| {
            warn!(to = %msg.to, error = %e, "Could not encode message");
            e
        })?;
        debug!(to = %msg.to, len = buf.len(), "Sending message");
        self.bus.send_to(&msg.to, &buf);
        Ok(())
    }
}

/// Decode one length prefixed message as written by
/// [ProtoBufEncodingLayer]. Bytes after the message are ignored.
pub fn decode_message(buf: &[u8]) -> Result<Message, WireError> {
    let prefix: [u8; PREFIX_LEN] = buf
        .get(..PREFIX_LEN)
        .and_then(|p| p.try_into().ok())
        .ok_or(WireError::Truncated)?;
    let len = u16::from_be_bytes(prefix) as usize;
    let body = buf
        .get(PREFIX_LEN..PREFIX_LEN + len)
        .ok_or(WireError::Truncated)?;
    MessageMsg::decode(body)?.try_into()
}
