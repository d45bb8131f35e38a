use bytes::BytesMut;
use diastack_core::codec::{DIAMETER_VERSION, HEADER_LEN, MAX_LENGTH};
use diastack_core::{DiameterError, Result};
use diastack_message::DiameterMessage;
use tokio_util::codec::{Decoder, Encoder};

/// One unit read off a peer's byte stream
#[derive(Debug)]
pub enum Frame {
    Message(DiameterMessage),
    /// Length was sane but the contents did not frame; the stream stays usable
    Malformed(DiameterError),
}

/// Splits a byte stream into Diameter messages using the 24-bit length
/// in the header.
///
/// A bad version or an impossible length means the stream cannot be
/// resynchronised, so those are returned as errors and end the stream.
#[derive(Debug, Clone, Copy)]
pub struct DiameterCodec {
    max_length: usize,
}

impl DiameterCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.clamp(HEADER_LEN, MAX_LENGTH),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for DiameterCodec {
    fn default() -> Self {
        Self::new(65535)
    }
}

impl Decoder for DiameterCodec {
    type Item = Frame;
    type Error = DiameterError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        if src.len() < 4 {
            return Ok(None);
        }

        if src[0] != DIAMETER_VERSION {
            return Err(DiameterError::ProtocolVersionMismatch(src[0]));
        }

        let length = u32::from_be_bytes([0, src[1], src[2], src[3]]) as usize;
        if length < HEADER_LEN {
            return Err(DiameterError::malformed(format!(
                "message length {length} shorter than the header"
            )));
        }
        if length > self.max_length {
            return Err(DiameterError::malformed(format!(
                "message length {length} above limit {}",
                self.max_length
            )));
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let data = src.split_to(length).freeze();
        match DiameterMessage::decode(&data) {
            Ok(msg) => Ok(Some(Frame::Message(msg))),
            Err(e) => Ok(Some(Frame::Malformed(e))),
        }
    }
}

impl Encoder<DiameterMessage> for DiameterCodec {
    type Error = DiameterError;

    fn encode(&mut self, item: DiameterMessage, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_length {
            return Err(DiameterError::malformed(format!(
                "message length {} above limit {}",
                item.len(),
                self.max_length
            )));
        }
        dst.reserve(item.len());
        item.encode_into(dst);
        Ok(())
    }
}
