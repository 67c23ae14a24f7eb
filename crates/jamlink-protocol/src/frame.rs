use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::ProtocolError;

/// Frame header: one type byte plus a little-endian payload length.
pub const HEADER_LEN: usize = 5;

/// Upper bound on a single payload. Interval chunks from real servers stay
/// in the tens of kilobytes; anything near this limit is a corrupt stream.
pub const MAX_PAYLOAD_LEN: u32 = 1 << 20;

/// One length-prefixed message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub kind: u8,
    pub payload: Vec<u8>,
}

/// Incremental frame decoder for a non-blocking socket.
///
/// `poll` performs at most one `read` on the underlying stream and returns a
/// complete frame once the header and payload have both arrived, preserving
/// partial data across calls. The caller decides how often to poll; the
/// reader itself never blocks beyond the stream's own timeout.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn poll(&mut self, stream: &mut impl Read) -> io::Result<Option<RawFrame>> {
        if let Some(frame) = self.take_frame()? {
            return Ok(Some(frame));
        }
        let mut chunk = [0u8; 4096];
        match stream.read(&mut chunk) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed",
            )),
            Ok(n) => {
                self.buf.extend_from_slice(&chunk[..n]);
                self.take_frame()
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn take_frame(&mut self) -> io::Result<Option<RawFrame>> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let kind = self.buf[0];
        let len = (&self.buf[1..5]).read_u32::<LittleEndian>()?;
        if len > MAX_PAYLOAD_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                ProtocolError::Oversized(len).to_string(),
            ));
        }
        let total = HEADER_LEN + len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }
        let payload = self.buf[HEADER_LEN..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(RawFrame { kind, payload }))
    }
}

/// Writes one framed message. Short writes are absorbed by `write_all`.
pub fn write_frame(stream: &mut impl Write, kind: u8, payload: &[u8]) -> io::Result<()> {
    let mut header = Vec::with_capacity(HEADER_LEN);
    header.write_u8(kind)?;
    header.write_u32::<LittleEndian>(payload.len() as u32)?;
    stream.write_all(&header)?;
    stream.write_all(payload)
}
