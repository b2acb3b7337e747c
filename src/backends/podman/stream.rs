//! Multiplexed exec output.
//!
//! Attached exec sessions without a TTY interleave stdout and stderr in
//! frames with an 8-byte header:
//!
//! ```text
//!   [stream: u8][0, 0, 0][length: u32 big-endian][payload ...]
//! ```
//!
//! Stream `0` is stdin, `1` stdout, `2` stderr. Output that does not start
//! with a valid header (TTY sessions) is passed through unframed.

use bytes::{Buf, Bytes, BytesMut};

const HEADER_LEN: usize = 8;

/// Source stream of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
    /// Unframed TTY output.
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Unknown,
    Framed,
    Raw,
}

/// Incremental frame decoder.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    mode: Mode,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            mode: Mode::Unknown,
        }
    }

    /// Appends received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the next complete frame, if buffered.
    pub fn next_frame(&mut self) -> Option<(StreamKind, Bytes)> {
        if self.buf.is_empty() {
            return None;
        }

        if self.mode == Mode::Unknown {
            self.mode = if self.buf[0] <= 2 && self.buf[1..self.buf.len().min(4)].iter().all(|b| *b == 0) {
                Mode::Framed
            } else {
                Mode::Raw
            };
        }

        if self.mode == Mode::Raw {
            return Some((StreamKind::Raw, self.buf.split().freeze()));
        }

        if self.buf.len() < HEADER_LEN {
            return None;
        }
        let kind = match self.buf[0] {
            0 => StreamKind::Stdin,
            1 => StreamKind::Stdout,
            _ => StreamKind::Stderr,
        };
        let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize;
        if self.buf.len() < HEADER_LEN + len {
            return None;
        }

        self.buf.advance(HEADER_LEN);
        Some((kind, self.buf.split_to(len).freeze()))
    }

    /// Drains whatever is left once the body has ended.
    ///
    /// A truncated trailing frame yields its partial payload.
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            return None;
        }
        if self.mode == Mode::Framed && self.buf.len() >= HEADER_LEN {
            self.buf.advance(HEADER_LEN);
        } else if self.mode == Mode::Framed {
            self.buf.clear();
            return None;
        }
        Some(self.buf.split().freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(stream: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![stream, 0, 0, 0];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_frames_split_across_chunks() {
        let mut data = frame(1, b"hello ");
        data.extend(frame(2, b"oops"));

        let mut decoder = FrameDecoder::new();
        decoder.push(&data[..5]);
        assert!(decoder.next_frame().is_none());

        decoder.push(&data[5..]);
        assert_eq!(
            decoder.next_frame(),
            Some((StreamKind::Stdout, Bytes::from_static(b"hello ")))
        );
        assert_eq!(
            decoder.next_frame(),
            Some((StreamKind::Stderr, Bytes::from_static(b"oops")))
        );
        assert!(decoder.next_frame().is_none());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_tty_output_passes_through() {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"plain text");
        assert_eq!(
            decoder.next_frame(),
            Some((StreamKind::Raw, Bytes::from_static(b"plain text")))
        );
    }
}
