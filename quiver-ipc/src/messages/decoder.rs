use bytes::{Buf, BytesMut};
use quiver_error::{QuiverResult, quiver_bail};

use crate::convert;
use crate::messages::{CONTINUATION_MARKER, Message};

/// Result of a decoding step.
#[derive(Debug)]
pub enum PollDecode {
    Message(Message),
    /// The stream terminated cleanly.
    Eos,
    /// The *total* number of additional bytes required before the decoder
    /// can take its next step. Decreases monotonically as bytes arrive
    /// within a frame.
    NeedMore(usize),
}

#[derive(Debug, Default)]
enum State {
    /// Waiting for the 4-byte prefix word.
    #[default]
    Prefix,
    /// Saw a continuation marker; waiting for the metadata length.
    Length,
    Metadata {
        length: usize,
    },
    Body {
        metadata: bytes::Bytes,
        body_length: usize,
    },
    Finished,
}

/// A stateful framing decoder fed by arbitrarily chunked bytes.
///
/// Chunking is a transport detail: any sequence of [`MessageDecoder::push`]
/// calls carrying the same bytes produces the same messages.
#[derive(Debug, Default)]
pub struct MessageDecoder {
    buffer: BytesMut,
    state: State,
}

impl MessageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes. Call [`MessageDecoder::poll`] until it reports
    /// `NeedMore` to drain every message the new bytes completed.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Whether bytes of an unfinished frame have been consumed.
    pub fn mid_frame(&self) -> bool {
        !matches!(self.state, State::Prefix) || !self.buffer.is_empty()
    }

    /// Total additional bytes needed before the next step can run.
    pub fn next_required_size(&self) -> usize {
        self.required().saturating_sub(self.buffer.len())
    }

    fn required(&self) -> usize {
        match &self.state {
            State::Prefix | State::Length => 4,
            State::Metadata { length } => *length,
            State::Body { body_length, .. } => *body_length,
            State::Finished => 0,
        }
    }

    pub fn poll(&mut self) -> QuiverResult<PollDecode> {
        loop {
            match &self.state {
                State::Prefix => {
                    if self.buffer.len() < 4 {
                        return Ok(PollDecode::NeedMore(4 - self.buffer.len()));
                    }
                    let word = self.buffer.get_u32_le();
                    if word == CONTINUATION_MARKER {
                        self.state = State::Length;
                    } else if word == 0 {
                        self.state = State::Finished;
                        return Ok(PollDecode::Eos);
                    } else {
                        // Legacy envelope: the word is the metadata length.
                        self.state = State::Metadata {
                            length: word as usize,
                        };
                    }
                }
                State::Length => {
                    if self.buffer.len() < 4 {
                        return Ok(PollDecode::NeedMore(4 - self.buffer.len()));
                    }
                    let length = self.buffer.get_u32_le();
                    if length == 0 {
                        self.state = State::Finished;
                        return Ok(PollDecode::Eos);
                    }
                    self.state = State::Metadata {
                        length: length as usize,
                    };
                }
                State::Metadata { length } => {
                    let length = *length;
                    if self.buffer.len() < length {
                        return Ok(PollDecode::NeedMore(length - self.buffer.len()));
                    }
                    let metadata = self.buffer.split_to(length).freeze();
                    let parts = convert::message_parts(&metadata)?;
                    let body_length = usize::try_from(parts.body_length)
                        .map_err(|_| quiver_error::quiver_err!(InvalidSerde: "body length overflow"))?;
                    self.state = State::Body {
                        metadata,
                        body_length,
                    };
                }
                State::Body {
                    metadata,
                    body_length,
                } => {
                    let body_length = *body_length;
                    if self.buffer.len() < body_length {
                        return Ok(PollDecode::NeedMore(body_length - self.buffer.len()));
                    }
                    let metadata = metadata.clone();
                    let body = self.buffer.split_to(body_length).freeze();
                    self.state = State::Prefix;
                    return Ok(PollDecode::Message(Message::try_new(metadata, body)?));
                }
                State::Finished => {
                    if !self.buffer.is_empty() {
                        quiver_bail!(InvalidSerde: "bytes arrived after the end-of-stream marker");
                    }
                    return Ok(PollDecode::Eos);
                }
            }
        }
    }
}
