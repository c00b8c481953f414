//! Rewindable reader used while classifying a connection
//!
//! Every byte pulled off the socket is kept in `buf`. Matchers read through a
//! cursor that [`Sniffer::rewind`] resets, so each matcher sees the stream
//! from its first byte and the winning connection is handed downstream with
//! the whole buffer replayed in front of the socket.

use std::io;
use tokio::io::AsyncReadExt;

use super::conn::{BoxedIo, MuxConnectInfo, MuxStream};

/// Upper bound on bytes buffered while classifying one connection
pub const MAX_SNIFF_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

pub struct Sniffer {
    io: BoxedIo,
    buf: Vec<u8>,
    pos: usize,
}

impl Sniffer {
    pub fn new(io: BoxedIo) -> Self {
        Self {
            io,
            buf: Vec::with_capacity(READ_CHUNK),
            pos: 0,
        }
    }

    /// Move the cursor back to the first byte of the connection
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Everything read from the socket so far
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Bytes consumed by the current matcher
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read from the socket until at least `n` unread bytes sit past the cursor
    async fn fill(&mut self, n: usize) -> io::Result<()> {
        let wanted = self.pos + n;
        if wanted > MAX_SNIFF_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("classification needs more than {} bytes", MAX_SNIFF_BYTES),
            ));
        }

        let mut chunk = [0u8; READ_CHUNK];
        while self.buf.len() < wanted {
            let read = self.io.read(&mut chunk).await?;
            if read == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }

        Ok(())
    }

    /// All unread bytes, waiting for the socket only until `min` are available
    pub async fn peek_available(&mut self, min: usize) -> io::Result<&[u8]> {
        self.fill(min).await?;
        Ok(&self.buf[self.pos..])
    }

    /// Consume exactly `n` bytes
    pub async fn read_exact(&mut self, n: usize) -> io::Result<&[u8]> {
        self.fill(n).await?;
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..self.pos])
    }

    /// Consume `expected` if the stream continues with it.
    ///
    /// Compares as bytes arrive and gives up on the first mismatch, so a short
    /// peer that is waiting for a response is not stalled until the timeout.
    pub async fn match_prefix(&mut self, expected: &[u8]) -> io::Result<bool> {
        let mut checked = 0;
        while checked < expected.len() {
            let available = self.peek_available(checked + 1).await?;
            let upto = available.len().min(expected.len());
            if available[checked..upto] != expected[checked..upto] {
                return Ok(false);
            }
            checked = upto;
        }

        self.pos += expected.len();
        Ok(true)
    }

    /// Consume one line, including its `\n`, of at most `max` bytes
    pub async fn read_line(&mut self, max: usize) -> io::Result<&[u8]> {
        let mut needed = 1;
        loop {
            let available = self.peek_available(needed).await?;
            if let Some(end) = available.iter().position(|b| *b == b'\n') {
                let start = self.pos;
                self.pos += end + 1;
                return Ok(&self.buf[start..self.pos]);
            }
            if available.len() >= max {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("line longer than {} bytes", max),
                ));
            }
            needed = available.len() + 1;
        }
    }

    /// Hand the connection downstream with every sniffed byte replayed first
    pub fn into_stream(self, info: MuxConnectInfo) -> MuxStream {
        MuxStream::new(self.buf, self.io, info)
    }
}
