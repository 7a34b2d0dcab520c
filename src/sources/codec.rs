//! Frame codecs for persistent device streams.

use std::io;

use bytes::{Buf, BytesMut};
use log::warn;
use tokio_util::codec::Decoder;

pub const STX: u8 = 0x02;
pub const LF: u8 = b'\n';
const CR: u8 = b'\r';

/// Longest frame accepted before input is discarded up to the next
/// terminator.
pub const MAX_FRAME_LEN: usize = 4096;

fn to_text(mut payload: &[u8]) -> String {
    if let [rest @ .., CR] = payload {
        payload = rest;
    }
    String::from_utf8_lossy(payload).into_owned()
}

/// `\r\n` (or bare `\n`) terminated text frames. Empty lines are skipped.
#[derive(Debug, Default)]
pub struct LineCodec {
    next_index: usize,
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        loop {
            let newline = buf[self.next_index..].iter().position(|b| *b == LF);

            match newline {
                Some(offset) if self.discarding => {
                    buf.advance(self.next_index + offset + 1);
                    self.next_index = 0;
                    self.discarding = false;
                }
                None if self.discarding => {
                    buf.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                Some(offset) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let frame = buf.split_to(end + 1);
                    if end > MAX_FRAME_LEN {
                        warn!("Dropping oversized frame ({end} bytes)");
                        continue;
                    }
                    let line = to_text(&frame[..end]);
                    if line.trim().is_empty() {
                        continue;
                    }
                    return Ok(Some(line));
                }
                None if buf.len() > MAX_FRAME_LEN => {
                    warn!("Frame exceeds {MAX_FRAME_LEN} bytes, discarding until next line");
                    self.discarding = true;
                    self.next_index = 0;
                    buf.clear();
                    return Ok(None);
                }
                None => {
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        let frame = self.decode(buf)?;
        if frame.is_none() {
            // unterminated tail
            buf.clear();
            self.next_index = 0;
        }
        Ok(frame)
    }
}

/// Frames of the form `STX payload [CR] LF`. Bytes outside a frame are
/// dropped; a second STX restarts the frame.
#[derive(Debug, Default)]
pub struct StxLfCodec;

impl StxLfCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for StxLfCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        loop {
            let Some(start) = buf.iter().position(|b| *b == STX) else {
                buf.clear();
                return Ok(None);
            };
            buf.advance(start);

            let Some(end) = buf.iter().position(|b| *b == LF) else {
                if buf.len() > MAX_FRAME_LEN {
                    warn!("STX frame exceeds {MAX_FRAME_LEN} bytes, discarding");
                    buf.clear();
                }
                return Ok(None);
            };

            let frame = buf.split_to(end + 1);
            let body = &frame[1..end];
            let payload = match body.iter().rposition(|b| *b == STX) {
                Some(restart) => &body[restart + 1..],
                None => body,
            };
            let text = to_text(payload);
            if text.trim().is_empty() {
                continue;
            }
            return Ok(Some(text));
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<String>> {
        let frame = self.decode(buf)?;
        if frame.is_none() {
            buf.clear();
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use pretty_assertions::assert_eq;
    use tokio_util::codec::FramedRead;

    #[test]
    fn crlf_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"   12.34 kg\r\n  0.50 kg\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("   12.34 kg"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("  0.50 kg"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn partial_line_waits_for_terminator() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"ST,GS,+0001"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"2.34 kg\r\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("ST,GS,+00012.34 kg")
        );
    }

    #[test]
    fn oversized_line_is_dropped() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(vec![b'x'; MAX_FRAME_LEN + 10].as_slice());
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"yyy\r\nok\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("ok"));
    }

    #[test]
    fn empty_lines_skipped() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"\r\n\r\n5 kg\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("5 kg"));
    }

    #[test]
    fn stx_frames() {
        let mut codec = StxLfCodec::new();
        let mut buf = BytesMut::from(&b"noise\x02 123.4 lx\r\n\x02garbage\x02 99\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(" 123.4 lx"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some(" 99"));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[tokio::test]
    async fn framed_over_split_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"   12.3")
            .read(b"4 kg\r\n   12.34 kg\r\n")
            .read(b"trailing")
            .build();
        let frames: Vec<String> = FramedRead::new(mock, LineCodec::new())
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(frames, vec!["   12.34 kg", "   12.34 kg"]);
    }
}
