//! Splits raw log bytes into messages.
//!
//! Containers started without a TTY have their output multiplexed by the
//! daemon: every frame is an 8 byte header `[stream, 0, 0, 0, len (u32 BE)]`
//! followed by `len` bytes of payload. Plain transports are newline
//! delimited. Either way the decoder buffers incomplete input until the rest
//! of the message arrives.

use bytes::{Buf, BytesMut};

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFraming {
    #[default]
    Lines,
    Multiplexed,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unknown stream type {0} in frame header")]
    UnknownStream(u8),
    #[error("malformed frame header {0:02x?}")]
    BadPadding([u8; 3]),
}

#[derive(Debug)]
pub struct FrameDecoder {
    framing: LogFraming,
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new(framing: LogFraming) -> Self {
        Self {
            framing,
            buf: BytesMut::new(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete message, whitespace-trimmed. May be empty.
    pub fn next_message(&mut self) -> Result<Option<String>, FrameError> {
        match self.framing {
            LogFraming::Lines => Ok(self.next_line()),
            LogFraming::Multiplexed => self.next_frame(),
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let line = self.buf.split_to(pos + 1);
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    fn next_frame(&mut self) -> Result<Option<String>, FrameError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let stream = self.buf[0];
        // stdin, stdout, stderr
        if stream > 2 {
            return Err(FrameError::UnknownStream(stream));
        }
        let padding = [self.buf[1], self.buf[2], self.buf[3]];
        if padding != [0, 0, 0] {
            return Err(FrameError::BadPadding(padding));
        }
        let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }
        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(len);
        Ok(Some(String::from_utf8_lossy(&payload).trim().to_string()))
    }
}
