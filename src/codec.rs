use bytes::{Buf, BytesMut};
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Frames a raw TCP byte stream into `serde_json::Value`s.
///
/// The wire protocol has no length prefix: a frame is simply "as much valid
/// JSON as can be parsed off the front of the buffer". A client may also
/// write several JSON objects back to back in one `send`, which arrives as
/// one `read` on the server; the decoder keeps trying to peel a complete
/// value off the front of its buffer until either a full object is found or
/// what's buffered so far is incomplete, at which point it waits for more
/// bytes.
///
/// A connection that never completes a frame within `MAX_FRAME_LEN` bytes is
/// misbehaving (or attacking) and gets `CodecError::FrameTooLarge`.
pub struct JsonLineCodec {
    max_frame_len: usize,
}

const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl Decoder for JsonLineCodec {
    type Item = Value;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, CodecError> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut deserializer = serde_json::Deserializer::from_slice(src).into_iter::<Value>();
        match deserializer.next() {
            Some(Ok(value)) => {
                let consumed = deserializer.byte_offset();
                src.advance(consumed);
                Ok(Some(value))
            }
            Some(Err(e)) if e.is_eof() => {
                if src.len() >= self.max_frame_len {
                    Err(CodecError::FrameTooLarge)
                } else {
                    Ok(None)
                }
            }
            Some(Err(e)) => Err(CodecError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e,
            ))),
            None => Ok(None),
        }
    }
}

impl Encoder<Value> for JsonLineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = serde_json::to_vec(&item)
            .map_err(|e| CodecError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        dst.extend_from_slice(&body);
        Ok(())
    }
}
