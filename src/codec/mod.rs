//! Message framing for mixed text/binary packets.
//!
//! A [`Packet`] is a text payload plus binary attachments. The base
//! serializer maps it onto a frame sequence: one JSON header frame naming
//! the payload and attachment count, then the attachments in order. The
//! [`chunked`] layer sits on top and splits frames that exceed a size
//! limit so they survive transports with per-message caps.

pub mod chunked;

pub use chunked::{ChunkedDecoder, ChunkedEncoder, CHUNK_SIZE};

use crate::error::{Error, Result};
use bytes::Bytes;
use serde_json::json;

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub payload: String,
    pub attachments: Vec<Bytes>,
}

impl Packet {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(payload: impl Into<String>, attachments: Vec<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            attachments,
        }
    }
}

/// Maps packets to frame sequences.
#[derive(Debug, Default)]
pub struct PacketSerializer;

impl PacketSerializer {
    pub fn serialize(&self, packet: &Packet) -> Result<Vec<Frame>> {
        let header = serde_json::to_string(&json!({
            "payload": packet.payload,
            "attachments": packet.attachments.len(),
        }))
        .map_err(|err| Error::format(err.to_string()))?;

        let mut frames = Vec::with_capacity(1 + packet.attachments.len());
        frames.push(Frame::Text(header));
        frames.extend(packet.attachments.iter().cloned().map(Frame::Binary));
        Ok(frames)
    }
}

/// Reassembles packets from a frame sequence.
#[derive(Debug, Default)]
pub struct PacketDeserializer {
    pending: Option<PendingPacket>,
}

#[derive(Debug)]
struct PendingPacket {
    payload: String,
    expected: usize,
    attachments: Vec<Bytes>,
}

impl PacketDeserializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one frame; returns a packet when it completes one.
    pub fn add(&mut self, frame: Frame) -> Result<Option<Packet>> {
        match (self.pending.take(), frame) {
            (None, Frame::Text(header)) => {
                let value: serde_json::Value = serde_json::from_str(&header)
                    .map_err(|err| Error::format(format!("malformed packet header: {err}")))?;
                let payload = value
                    .get("payload")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::format("packet header missing payload"))?
                    .to_owned();
                let expected = value
                    .get("attachments")
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| Error::format("packet header missing attachment count"))?
                    as usize;

                if expected == 0 {
                    return Ok(Some(Packet {
                        payload,
                        attachments: Vec::new(),
                    }));
                }
                self.pending = Some(PendingPacket {
                    payload,
                    expected,
                    attachments: Vec::new(),
                });
                Ok(None)
            }
            (None, Frame::Binary(_)) => {
                Err(Error::format("binary frame outside any packet"))
            }
            (Some(mut pending), Frame::Binary(bytes)) => {
                pending.attachments.push(bytes);
                if pending.attachments.len() == pending.expected {
                    Ok(Some(Packet {
                        payload: pending.payload,
                        attachments: pending.attachments,
                    }))
                } else {
                    self.pending = Some(pending);
                    Ok(None)
                }
            }
            (Some(_), Frame::Text(_)) => {
                Err(Error::format("text frame while awaiting attachments"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_deserialize_round_trip() {
        let packet = Packet::with_attachments(
            "load chunk 3",
            vec![Bytes::from_static(b"abc"), Bytes::from_static(b"defg")],
        );

        let frames = PacketSerializer.serialize(&packet).unwrap();
        assert_eq!(frames.len(), 3);

        let mut deserializer = PacketDeserializer::new();
        let mut result = None;
        for frame in frames {
            result = deserializer.add(frame).unwrap();
        }
        assert_eq!(result.unwrap(), packet);
    }

    #[test]
    fn test_text_only_packet_completes_on_header() {
        let packet = Packet::text("ping");
        let frames = PacketSerializer.serialize(&packet).unwrap();
        assert_eq!(frames.len(), 1);

        let mut deserializer = PacketDeserializer::new();
        let out = deserializer.add(frames.into_iter().next().unwrap()).unwrap();
        assert_eq!(out.unwrap(), packet);
    }

    #[test]
    fn test_stray_binary_frame_is_format_error() {
        let mut deserializer = PacketDeserializer::new();
        let err = deserializer
            .add(Frame::Binary(Bytes::from_static(b"oops")))
            .unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }

    #[test]
    fn test_malformed_header_is_format_error() {
        let mut deserializer = PacketDeserializer::new();
        let err = deserializer
            .add(Frame::Text("not json".into()))
            .unwrap_err();
        assert!(matches!(err, Error::Format(_)));
    }
}
