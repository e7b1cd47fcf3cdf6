//! The message frame: a typed, tagged record carried inside one DNS query
//! or answer. See `wire.rs` for the underlying varint primitives.
use std::convert::TryFrom;
use std::io::Cursor;

use crate::error::{TunnelError, TunnelResult};
use crate::wire::{ToFromWire, WireBytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Totp = 0,
    Init = 1,
    Poll = 2,
    DataFromImplant = 3,
    DataToImplant = 4,
    Manifest = 5,
    Nop = 6,
}

impl TryFrom<u8> for FrameType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FrameType::Totp),
            1 => Ok(FrameType::Init),
            2 => Ok(FrameType::Poll),
            3 => Ok(FrameType::DataFromImplant),
            4 => Ok(FrameType::DataToImplant),
            5 => Ok(FrameType::Manifest),
            6 => Ok(FrameType::Nop),
            _ => Err(()),
        }
    }
}

crate::derive_wire_enum!(FrameType, FrameType::Nop);

/// `{ type, id, start, stop, size, data }`. Absent (zero-valued) fields
/// serialize to a single byte each, so a `POLL` or `NOP` frame is a few
/// bytes total.
///
/// Invariant for a multi-fragment message: `start` is the offset of
/// `data` within the logical payload, `stop == start + data.len()`, and
/// `size` is the total payload length (only meaningful on `MANIFEST` and
/// `INIT` frames).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    pub id: u32,
    pub start: u32,
    pub stop: u32,
    pub size: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn nop(id: u32, data: Vec<u8>) -> Self {
        Frame { frame_type: FrameType::Nop, id, data, ..Default::default() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        self.frame_type.to_wire_bytes(&mut buffer);
        self.id.to_wire_bytes(&mut buffer);
        self.start.to_wire_bytes(&mut buffer);
        self.stop.to_wire_bytes(&mut buffer);
        self.size.to_wire_bytes(&mut buffer);
        WireBytes(self.data.clone()).to_wire_bytes(&mut buffer);
        buffer
    }

    pub fn decode(bytes: &[u8]) -> TunnelResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let frame_type = FrameType::from_wire_bytes(&mut cursor)?;
        let id = u32::from_wire_bytes(&mut cursor)?;
        let start = u32::from_wire_bytes(&mut cursor)?;
        let stop = u32::from_wire_bytes(&mut cursor)?;
        let size = u32::from_wire_bytes(&mut cursor)?;
        let data = WireBytes::from_wire_bytes(&mut cursor)?.0;
        Ok(Frame { frame_type, id, start, stop, size, data })
    }

    /// Decode and assert the frame carries the expected type, the shape
    /// every call site in `session.rs`/`receiver.rs` needs before trusting
    /// a response's other fields.
    pub fn decode_expecting(bytes: &[u8], expected: FrameType) -> TunnelResult<Self> {
        let frame = Frame::decode(bytes)?;
        if frame.frame_type != expected {
            return Err(TunnelError::InvalidResponse(format!(
                "expected {:?} frame, got {:?}",
                expected, frame.frame_type
            )));
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let frame = Frame {
            frame_type: FrameType::DataFromImplant,
            id: 0x01020304,
            start: 100,
            stop: 160,
            size: 4096,
            data: vec![1, 2, 3, 4, 5, 6],
        };
        let encoded = frame.encode();
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn re_encoding_a_decoded_frame_is_byte_stable() {
        let frame = Frame {
            frame_type: FrameType::Manifest,
            id: 7,
            start: 0,
            stop: 0,
            size: 999,
            data: Vec::new(),
        };
        let encoded = frame.encode();
        let decoded = Frame::decode(&encoded).unwrap();
        assert_eq!(decoded.encode(), encoded);
    }

    #[test]
    fn zero_valued_frame_is_small() {
        let frame = Frame::nop(0, Vec::new());
        // type(1) + id(1) + start(1) + stop(1) + size(1) + data-len(1) = 6
        assert_eq!(frame.encode().len(), 6);
    }

    #[test]
    fn unknown_type_tag_is_invalid_response() {
        let mut bytes = Frame::nop(1, vec![0xAA]).encode();
        bytes[0] = 0xFF; // not a valid FrameType
        assert!(Frame::decode(&bytes).is_err());
    }

    #[test]
    fn decode_expecting_rejects_wrong_type() {
        let bytes = Frame::nop(1, Vec::new()).encode();
        assert!(Frame::decode_expecting(&bytes, FrameType::Manifest).is_err());
    }

    #[test]
    fn truncated_frame_is_invalid_response() {
        let bytes = Frame::nop(1, vec![1, 2, 3]).encode();
        assert!(Frame::decode(&bytes[..bytes.len() - 1]).is_err());
    }
}
