//! Two-ended byte deque.
//!
//! Stores an ordered run of immutable `Bytes` segments so that feeding a
//! network chunk is an O(1) push and erasing consumed bytes never copies:
//! whole segments are dropped and only the boundary segment is split
//! (`Bytes::split_to`/`split_off` are reference-counted slices).

use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

/// A deque of byte segments addressable from both ends.
///
/// Invariant: no empty segments are stored; `len()` is always the exact sum
/// of segment lengths.
#[derive(Debug, Default)]
pub struct ByteDeque {
    segments: VecDeque<Bytes>,
    size: usize,
}

impl ByteDeque {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.size = 0;
    }

    /// Appends bytes to the end.
    pub fn push_end(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return;
        }
        self.size += bytes.len();
        self.segments.push_back(bytes);
    }

    /// Prepends bytes to the start.
    pub fn push_start(&mut self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return;
        }
        self.size += bytes.len();
        self.segments.push_front(bytes);
    }

    /// Moves the contents of another deque to the start, preserving order.
    /// The other deque is left empty.
    pub fn push_start_deque(&mut self, other: &mut ByteDeque) {
        while let Some(segment) = other.segments.pop_back() {
            self.segments.push_front(segment);
        }
        self.size += other.size;
        other.size = 0;
    }

    /// Removes and returns up to `count` bytes from the start as one
    /// contiguous buffer.
    pub fn pop_start(&mut self, count: usize) -> Bytes {
        let take = count.min(self.size);
        if take == 0 {
            return Bytes::new();
        }

        // Fast path: the request fits inside the first segment.
        let front = self.segments.front_mut().expect("non-empty deque");
        if front.len() >= take {
            let popped = front.split_to(take);
            if front.is_empty() {
                self.segments.pop_front();
            }
            self.size -= take;
            return popped;
        }

        let mut out = BytesMut::with_capacity(take);
        let mut remaining = take;
        while remaining > 0 {
            let mut segment = self.segments.pop_front().expect("size accounting");
            if segment.len() <= remaining {
                remaining -= segment.len();
                out.extend_from_slice(&segment);
            } else {
                out.extend_from_slice(&segment.split_to(remaining));
                remaining = 0;
                self.segments.push_front(segment);
            }
        }
        self.size -= take;
        out.freeze()
    }

    /// Drops up to `count` bytes from the start without materializing them.
    pub fn erase_start(&mut self, count: usize) {
        let mut remaining = count.min(self.size);
        self.size -= remaining;
        while remaining > 0 {
            let front = self.segments.front_mut().expect("size accounting");
            if front.len() <= remaining {
                remaining -= front.len();
                self.segments.pop_front();
            } else {
                front.advance(remaining);
                remaining = 0;
            }
        }
    }

    /// Removes and returns up to `count` bytes from the end as one
    /// contiguous buffer.
    pub fn pop_end(&mut self, count: usize) -> Bytes {
        let take = count.min(self.size);
        if take == 0 {
            return Bytes::new();
        }

        let back = self.segments.back_mut().expect("non-empty deque");
        if back.len() >= take {
            let popped = back.split_off(back.len() - take);
            if back.is_empty() {
                self.segments.pop_back();
            }
            self.size -= take;
            return popped;
        }

        // Collect tail segments, then join them in order.
        let mut tail: Vec<Bytes> = Vec::new();
        let mut remaining = take;
        while remaining > 0 {
            let mut segment = self.segments.pop_back().expect("size accounting");
            if segment.len() <= remaining {
                remaining -= segment.len();
                tail.push(segment);
            } else {
                tail.push(segment.split_off(segment.len() - remaining));
                remaining = 0;
                self.segments.push_back(segment);
            }
        }
        let mut out = BytesMut::with_capacity(take);
        for segment in tail.iter().rev() {
            out.extend_from_slice(segment);
        }
        self.size -= take;
        out.freeze()
    }

    /// Drops up to `count` bytes from the end without materializing them.
    pub fn erase_end(&mut self, count: usize) {
        let mut remaining = count.min(self.size);
        self.size -= remaining;
        while remaining > 0 {
            let back = self.segments.back_mut().expect("size accounting");
            if back.len() <= remaining {
                remaining -= back.len();
                self.segments.pop_back();
            } else {
                let keep = back.len() - remaining;
                back.truncate(keep);
                remaining = 0;
            }
        }
    }

    /// Removes and returns the entire contents as one contiguous buffer.
    pub fn pop_all(&mut self) -> Bytes {
        self.pop_start(self.size)
    }

    /// Copies `buf.len()` bytes starting at `offset` into `buf` without
    /// consuming them. Returns false when not enough bytes are buffered.
    pub fn copy_at(&self, offset: usize, buf: &mut [u8]) -> bool {
        if offset + buf.len() > self.size {
            return false;
        }
        let mut skip = offset;
        let mut written = 0;
        for segment in &self.segments {
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            let available = &segment[skip..];
            skip = 0;
            let take = available.len().min(buf.len() - written);
            buf[written..written + take].copy_from_slice(&available[..take]);
            written += take;
            if written == buf.len() {
                break;
            }
        }
        true
    }
}
