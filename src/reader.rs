//! Incremental byte reader.
//!
//! A pull-model cursor over an unbounded feed. Primitives are all-or-nothing
//! against buffered input: they either return `Step::Ready` after consuming
//! exactly what they report, or `Step::Pending` after consuming nothing, at
//! which point the driver calls [`StreamReader::feed`] with the next raw
//! chunk and retries. No I/O happens inside the reader.
//!
//! A reader is scoped to exactly one parse session and is not reused.

use crate::buffer::ByteDeque;
use bytes::{Buf, Bytes};

/// Byte order for multi-byte reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Outcome of a read primitive: either the value, or "feed more bytes".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<T> {
    Ready(T),
    Pending,
}

impl<T> Step<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Step<U> {
        match self {
            Step::Ready(value) => Step::Ready(f(value)),
            Step::Pending => Step::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Step::Pending)
    }

    #[cfg(test)]
    pub fn unwrap(self) -> T {
        match self {
            Step::Ready(value) => value,
            Step::Pending => panic!("called unwrap on Step::Pending"),
        }
    }
}

/// Shorthand for primitives composed of several reads: bail out with
/// `Pending` unless the sub-read is ready.
macro_rules! ready {
    ($step:expr) => {
        match $step {
            Step::Ready(value) => value,
            Step::Pending => return Step::Pending,
        }
    };
}


/// Cursor over an incrementally fed byte stream.
#[derive(Debug, Default)]
pub struct StreamReader {
    leftover: ByteDeque,
    pos: u64,
}

impl StreamReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes consumed from the feed. Peeked bytes are excluded.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.leftover.len()
    }

    /// Appends the next raw chunk from the driver.
    pub fn feed(&mut self, bytes: impl Into<Bytes>) {
        self.leftover.push_end(bytes);
    }

    /// Consumes and returns exactly `len` bytes.
    pub fn read(&mut self, len: usize) -> Step<Bytes> {
        if self.leftover.len() < len {
            return Step::Pending;
        }
        let data = self.leftover.pop_start(len);
        self.pos += len as u64;
        Step::Ready(data)
    }

    /// Returns exactly `len` bytes without advancing the position or
    /// removing them from the buffer.
    pub fn peek(&mut self, len: usize) -> Step<Bytes> {
        if self.leftover.len() < len {
            return Step::Pending;
        }
        let data = self.leftover.pop_start(len);
        self.leftover.push_start(data.clone());
        Step::Ready(data)
    }

    /// Consumes exactly `len` bytes without materializing them.
    pub fn seek(&mut self, len: usize) -> Step<()> {
        if self.leftover.len() < len {
            return Step::Pending;
        }
        self.leftover.erase_start(len);
        self.pos += len as u64;
        Step::Ready(())
    }

    /// Consumes up to `len` buffered bytes, returning how many were
    /// consumed. Never suspends; the caller loops across feeds.
    pub fn skip_available(&mut self, len: u64) -> u64 {
        let take = (self.leftover.len() as u64).min(len);
        self.leftover.erase_start(take as usize);
        self.pos += take;
        take
    }

    /// Reads `len` bytes as an ASCII string (bytes mapped 1:1 to chars).
    pub fn read_ascii(&mut self, len: usize) -> Step<String> {
        self.read(len)
            .map(|bytes| bytes.iter().map(|&b| b as char).collect())
    }

    pub fn read_u8(&mut self) -> Step<u8> {
        self.read(1).map(|b| b[0])
    }

    pub fn read_i8(&mut self) -> Step<i8> {
        self.read(1).map(|b| b[0] as i8)
    }

    pub fn read_u16(&mut self, endian: Endian) -> Step<u16> {
        let mut bytes = ready!(self.read(2));
        Step::Ready(match endian {
            Endian::Little => bytes.get_u16_le(),
            Endian::Big => bytes.get_u16(),
        })
    }

    pub fn read_i16(&mut self, endian: Endian) -> Step<i16> {
        self.read_u16(endian).map(|v| v as i16)
    }

    pub fn read_u32(&mut self, endian: Endian) -> Step<u32> {
        let mut bytes = ready!(self.read(4));
        Step::Ready(match endian {
            Endian::Little => bytes.get_u32_le(),
            Endian::Big => bytes.get_u32(),
        })
    }

    pub fn read_i32(&mut self, endian: Endian) -> Step<i32> {
        self.read_u32(endian).map(|v| v as i32)
    }

    /// Copies `buf.len()` bytes at `offset` past the cursor without
    /// consuming anything. Used for multi-field lookahead.
    pub fn peek_at(&self, offset: usize, buf: &mut [u8]) -> Step<()> {
        if self.leftover.copy_at(offset, buf) {
            Step::Ready(())
        } else {
            Step::Pending
        }
    }
}
