use std::io::Read;

use bytes::Bytes;
use quiver_error::{QuiverResult, quiver_bail};

use crate::messages::{CONTINUATION_MARKER, Message};

/// How a read for the next message ended.
#[derive(Debug)]
pub(crate) enum NextMessage {
    Message(Message),
    /// An explicit end-of-stream marker (zero length where a message would
    /// start).
    ExplicitEos,
    /// The source was exhausted exactly at a message boundary.
    SourceEnd,
}

/// A sequential reader of framed messages.
///
/// Interprets nothing beyond the envelope, which makes it the building
/// block for stream splicing and diagnostics as well as the blocking
/// stream reader.
#[derive(Debug)]
pub struct MessageReader<R> {
    reader: R,
}

impl<R: Read> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// The next message, or `None` at end of stream. A cleanly terminated
    /// stream and an exhausted source are both `None`; truncation inside a
    /// message is an error.
    pub fn read_next(&mut self) -> QuiverResult<Option<Message>> {
        Ok(match self.read_next_detailed()? {
            NextMessage::Message(message) => Some(message),
            NextMessage::ExplicitEos | NextMessage::SourceEnd => None,
        })
    }

    pub(crate) fn read_next_detailed(&mut self) -> QuiverResult<NextMessage> {
        let mut prefix = [0u8; 4];
        match self.read_up_to(&mut prefix)? {
            0 => return Ok(NextMessage::SourceEnd),
            4 => {}
            n => quiver_bail!(InvalidSerde: "stream ended after {} bytes of a message prefix", n),
        }

        let word = u32::from_le_bytes(prefix);
        let metadata_length = if word == CONTINUATION_MARKER {
            let mut length = [0u8; 4];
            if self.read_up_to(&mut length)? != 4 {
                quiver_bail!(InvalidSerde: "stream ended inside a message prefix");
            }
            u32::from_le_bytes(length)
        } else {
            // Legacy envelope: the first word is the metadata length, and a
            // bare zero is a clean end of stream.
            word
        };

        if metadata_length == 0 {
            return Ok(NextMessage::ExplicitEos);
        }

        let metadata = self.read_exact_bytes(metadata_length as usize)?;
        let parts = crate::convert::message_parts(&metadata)?;
        let body_length = usize::try_from(parts.body_length)
            .map_err(|_| quiver_error::quiver_err!(InvalidSerde: "body length overflow"))?;
        let body = self.read_exact_bytes(body_length)?;
        Ok(NextMessage::Message(Message::try_new(metadata, body)?))
    }

    /// Read until `buf` is full or the source ends; returns the byte count.
    fn read_up_to(&mut self, buf: &mut [u8]) -> QuiverResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Read exactly `len` bytes without trusting `len` for preallocation:
    /// a corrupt length prefix must fail cleanly, not reserve gigabytes.
    fn read_exact_bytes(&mut self, len: usize) -> QuiverResult<Bytes> {
        let mut buf = Vec::new();
        (&mut self.reader)
            .take(len as u64)
            .read_to_end(&mut buf)?;
        if buf.len() != len {
            quiver_bail!(
                InvalidSerde: "stream ended after {} of {} expected message bytes",
                buf.len(),
                len
            );
        }
        Ok(Bytes::from(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_source_is_no_message() {
        let mut reader = MessageReader::new(&[] as &[u8]);
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn three_byte_buffer_is_invalid() {
        let mut reader = MessageReader::new(&[1u8, 2, 3] as &[u8]);
        let err = reader.read_next().unwrap_err();
        assert!(err.is_invalid());
    }

    #[test]
    fn zero_word_is_clean_eos() {
        let mut reader = MessageReader::new(&[0u8, 0, 0, 0] as &[u8]);
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn garbage_prefix_fails() {
        let mut reader = MessageReader::new(b"12345678" as &[u8]);
        let err = reader.read_next().unwrap_err();
        assert!(err.is_invalid());
    }
}
