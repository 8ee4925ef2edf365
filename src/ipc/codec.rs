/*!
 * IPC Frame Codec
 * Length-prefixed JSON frames
 *
 * Each frame is a 4-byte big-endian payload length followed by the payload,
 * one UTF-8 JSON document. Oversized frames are rejected on both sides.
 */

use super::types::{IpcError, IpcResult, Message};
use crate::core::limits::{IPC_FRAME_HEADER_SIZE, MAX_IPC_MESSAGE_SIZE};
use crate::core::types::Size;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Frame codec for the message channel
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_message_size: Size,
}

impl MessageCodec {
    pub fn new() -> Self {
        Self::with_max_message_size(MAX_IPC_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: Size) -> Self {
        Self { max_message_size }
    }

    #[inline]
    fn check_size(&self, size: Size) -> IpcResult<()> {
        if size > self.max_message_size || size > u32::MAX as Size {
            return Err(IpcError::FrameTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = IpcError;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> IpcResult<()> {
        encode_into(self, &message, dst)
    }
}

impl Encoder<&Message> for MessageCodec {
    type Error = IpcError;

    fn encode(&mut self, message: &Message, dst: &mut BytesMut) -> IpcResult<()> {
        encode_into(self, message, dst)
    }
}

fn encode_into(codec: &MessageCodec, message: &Message, dst: &mut BytesMut) -> IpcResult<()> {
    let payload = serde_json::to_vec(message)?;
    codec.check_size(payload.len())?;
    dst.reserve(IPC_FRAME_HEADER_SIZE + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.extend_from_slice(&payload);
    Ok(())
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = IpcError;

    fn decode(&mut self, src: &mut BytesMut) -> IpcResult<Option<Message>> {
        if src.len() < IPC_FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut header = [0u8; IPC_FRAME_HEADER_SIZE];
        header.copy_from_slice(&src[..IPC_FRAME_HEADER_SIZE]);
        let size = u32::from_be_bytes(header) as Size;
        self.check_size(size)?;

        let frame_len = IPC_FRAME_HEADER_SIZE + size;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(IPC_FRAME_HEADER_SIZE);
        let payload = src.split_to(size);
        Ok(Some(serde_json::from_slice(&payload)?))
    }
}

/// Encode one message as a standalone frame
pub fn encode_frame(message: &Message) -> IpcResult<Bytes> {
    let mut dst = BytesMut::new();
    MessageCodec::new().encode(message, &mut dst)?;
    Ok(dst.freeze())
}

/// Decode every complete frame in `bytes`, ignoring a trailing partial frame
pub fn decode_frames(bytes: &[u8]) -> IpcResult<Vec<Message>> {
    let mut codec = MessageCodec::new();
    let mut src = BytesMut::from(bytes);
    let mut messages = Vec::new();
    while let Some(message) = codec.decode(&mut src)? {
        messages.push(message);
    }
    Ok(messages)
}
