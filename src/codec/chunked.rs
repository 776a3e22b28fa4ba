//! Frame chunking for size-capped transports.
//!
//! When every frame of a serialized packet fits the limit, the encoder
//! emits them unchanged; the decoder passes unmarked frames straight
//! through. Otherwise the encoder splits oversized frames and prepends one
//! control frame, `C` followed by a JSON integer array whose entry *i* is
//! the number of wire frames that reconstruct original frame *i*.

use super::{Frame, Packet, PacketDeserializer, PacketSerializer};
use crate::error::{Error, Result};
use crate::events::{ListenerHandle, Listeners};
use bytes::Bytes;
use std::collections::VecDeque;
use tracing::debug;

/// Default frame size limit: 1 MiB.
pub const CHUNK_SIZE: usize = 1 << 20;

const CONTROL_MARKER: char = 'C';

/// Splits packets into limit-respecting frame sequences.
pub struct ChunkedEncoder {
    serializer: PacketSerializer,
    limit: usize,
}

impl Default for ChunkedEncoder {
    fn default() -> Self {
        Self::new(CHUNK_SIZE)
    }
}

impl ChunkedEncoder {
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "chunk limit must be positive");
        Self {
            serializer: PacketSerializer,
            limit,
        }
    }

    pub fn encode(&self, packet: &Packet) -> Result<Vec<Frame>> {
        let frames = self.serializer.serialize(packet)?;

        // Zero-overhead path: no control frame, exact frame count.
        if frames.iter().all(|frame| frame.len() <= self.limit) {
            return Ok(frames);
        }

        let mut counts = Vec::with_capacity(frames.len());
        let mut wire = Vec::new();
        for frame in frames {
            let pieces = self.split(frame);
            counts.push(pieces.len());
            wire.extend(pieces);
        }

        let control = serde_json::to_string(&counts)
            .map_err(|err| Error::format(err.to_string()))?;
        debug!(frames = wire.len(), "packet chunked");
        let mut out = Vec::with_capacity(1 + wire.len());
        out.push(Frame::Text(format!("{CONTROL_MARKER}{control}")));
        out.extend(wire);
        Ok(out)
    }

    fn split(&self, frame: Frame) -> Vec<Frame> {
        if frame.len() <= self.limit {
            return vec![frame];
        }
        match frame {
            Frame::Text(text) => split_text(&text, self.limit)
                .into_iter()
                .map(Frame::Text)
                .collect(),
            Frame::Binary(bytes) => split_binary(&bytes, self.limit)
                .into_iter()
                .map(Frame::Binary)
                .collect(),
        }
    }
}

/// Splits at char boundaries; each piece stays within `limit` bytes unless
/// a single char alone exceeds it.
fn split_text(text: &str, limit: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if !current.is_empty() && current.len() + ch.len_utf8() > limit {
            pieces.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    pieces.push(current);
    pieces
}

/// Fragments are copies; they never alias the source buffer.
fn split_binary(bytes: &Bytes, limit: usize) -> Vec<Bytes> {
    bytes.chunks(limit).map(Bytes::copy_from_slice).collect()
}

/// Reassembles chunked frame sequences and decodes packets.
pub struct ChunkedDecoder {
    deserializer: PacketDeserializer,
    /// Remaining per-original-frame piece counts of the active control
    /// frame; empty means passthrough mode.
    counts: VecDeque<usize>,
    batch: Vec<Frame>,
    decoded: Listeners<Packet>,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            deserializer: PacketDeserializer::new(),
            counts: VecDeque::new(),
            batch: Vec::new(),
            decoded: Listeners::new(),
        }
    }

    /// Notifies on every completed packet.
    pub fn on_decoded(
        &self,
        listener: impl Fn(&Packet) + Send + Sync + 'static,
    ) -> ListenerHandle {
        self.decoded.on(listener)
    }

    pub fn off_decoded(&self, handle: ListenerHandle) {
        self.decoded.off(handle);
    }

    /// Feeds one wire frame; returns the packet it completed, if any.
    pub fn add(&mut self, frame: Frame) -> Result<Option<Packet>> {
        if self.counts.is_empty() {
            if let Frame::Text(text) = &frame {
                if let Some(rest) = text.strip_prefix(CONTROL_MARKER) {
                    let counts: Vec<usize> = serde_json::from_str(rest).map_err(|err| {
                        Error::format(format!("malformed chunk control frame: {err}"))
                    })?;
                    if counts.iter().any(|&count| count == 0) {
                        return Err(Error::format(
                            "chunk control frame declares an empty reconstruction",
                        ));
                    }
                    self.counts = counts.into();
                    return Ok(None);
                }
            }
            return self.feed(frame);
        }

        self.batch.push(frame);
        let expected = *self.counts.front().ok_or_else(|| {
            Error::format("chunk reassembly state lost")
        })?;
        if self.batch.len() < expected {
            return Ok(None);
        }

        self.counts.pop_front();
        let joined = join(std::mem::take(&mut self.batch))?;
        self.feed(joined)
    }

    fn feed(&mut self, frame: Frame) -> Result<Option<Packet>> {
        let packet = self.deserializer.add(frame)?;
        if let Some(packet) = &packet {
            self.decoded.emit(packet);
        }
        Ok(packet)
    }
}

/// Joins fragments of one original frame. Mixed kinds are malformed input.
fn join(batch: Vec<Frame>) -> Result<Frame> {
    let mut frames = batch.into_iter();
    let first = frames
        .next()
        .ok_or_else(|| Error::format("empty chunk reconstruction"))?;
    match first {
        Frame::Text(mut text) => {
            for frame in frames {
                match frame {
                    Frame::Text(piece) => text.push_str(&piece),
                    Frame::Binary(_) => {
                        return Err(Error::format(
                            "binary fragment in a text reconstruction",
                        ))
                    }
                }
            }
            Ok(Frame::Text(text))
        }
        Frame::Binary(first) => {
            let mut bytes = Vec::from(first.as_ref());
            for frame in frames {
                match frame {
                    Frame::Binary(piece) => bytes.extend_from_slice(&piece),
                    Frame::Text(_) => {
                        return Err(Error::format(
                            "text fragment in a binary reconstruction",
                        ))
                    }
                }
            }
            Ok(Frame::Binary(Bytes::from(bytes)))
        }
    }
}
