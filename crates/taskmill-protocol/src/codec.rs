use crate::{Message, MessageType, ProtocolError, Result, MAX_MESSAGE_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use tokio_util::codec::{Decoder, Encoder};

/// Length-prefixed framing for scheduler messages
///
/// Frame format: [4-byte length (big-endian)] [1-byte message type] [payload]
///
/// The length covers the type byte and the bincode payload.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageCodec;

fn payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < 5 {
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[0..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(length));
        }
        if length == 0 {
            return Err(ProtocolError::Protocol("empty frame".to_string()));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);

        let msg_type_byte = src.get_u8();
        let msg_type = MessageType::from_u8(msg_type_byte)
            .ok_or(ProtocolError::InvalidMessageType(msg_type_byte))?;

        let body = src.split_to(length - 1);

        let message = match msg_type {
            MessageType::RegisterTask => Message::RegisterTask(payload(&body)?),
            MessageType::GetTask => Message::GetTask(payload(&body)?),
            MessageType::AbortTask => Message::AbortTask(payload(&body)?),
            MessageType::LongPoll => Message::LongPoll(payload(&body)?),
            MessageType::AcceptTask => Message::AcceptTask(payload(&body)?),
            MessageType::CompleteTask => Message::CompleteTask(payload(&body)?),
            MessageType::ReportProgress => Message::ReportProgress(payload(&body)?),
            MessageType::Registered => Message::Registered(payload(&body)?),
            MessageType::TaskFound => Message::TaskFound(payload(&body)?),
            MessageType::Polled => Message::Polled(payload(&body)?),
            MessageType::Progress => Message::Progress(payload(&body)?),
            MessageType::Ack => Message::Ack,
            MessageType::Error => Message::Error(payload(&body)?),
        };

        Ok(Some(message))
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let payload = match &item {
            Message::RegisterTask(req) => bincode::serialize(req)?,
            Message::GetTask(req) | Message::AbortTask(req) | Message::AcceptTask(req) => {
                bincode::serialize(req)?
            }
            Message::LongPoll(req) => bincode::serialize(req)?,
            Message::CompleteTask(req) => bincode::serialize(req)?,
            Message::ReportProgress(req) => bincode::serialize(req)?,
            Message::Registered(resp) => bincode::serialize(resp)?,
            Message::TaskFound(resp) => bincode::serialize(resp)?,
            Message::Polled(resp) => bincode::serialize(resp)?,
            Message::Progress(resp) => bincode::serialize(resp)?,
            Message::Ack => Vec::new(),
            Message::Error(status) => bincode::serialize(status)?,
        };

        let total_length = 1 + payload.len();
        if total_length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(total_length));
        }

        dst.reserve(4 + total_length);
        dst.put_u32(total_length as u32);
        dst.put_u8(item.message_type().as_u8());
        dst.put_slice(&payload);

        Ok(())
    }
}
