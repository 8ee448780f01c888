use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::assets::FRAME_HEADER_SIZE;
use crate::error::{ProtocolViolation, Result};
use crate::pipeline::types::{CompressedUnit, StreamKind, Timestamp};

/// Fixed 18-byte packet header, all multi-byte fields big-endian.
///
/// ```text
/// offset  size  field
///      0     1  stream type (1 = RGB, 2 = Depth)
///      1     8  timestamp, f64 session-relative seconds
///      9     4  frame number, u32
///     13     4  payload size, u32
///     17     1  keyframe flag (0 / 1)
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameHeader {
    pub kind: StreamKind,
    pub timestamp: Timestamp,
    pub frame_number: u32,
    pub payload_size: u32,
    pub is_keyframe: bool,
}

impl FrameHeader {
    pub fn for_unit(unit: &CompressedUnit) -> Result<Self> {
        let payload_size = u32::try_from(unit.payload.len()).map_err(|_| {
            ProtocolViolation::PayloadTooLarge {
                size: unit.payload.len(),
                max: u32::MAX as usize,
            }
        })?;
        Ok(Self {
            kind: unit.kind,
            timestamp: unit.timestamp,
            frame_number: unit.frame_number,
            payload_size,
            is_keyframe: unit.is_keyframe,
        })
    }

    pub fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.kind.wire_id());
        dst.put_f64(self.timestamp.secs);
        dst.put_u32(self.frame_number);
        dst.put_u32(self.payload_size);
        dst.put_u8(u8::from(self.is_keyframe));
    }

    /// Parse a header from exactly [`FRAME_HEADER_SIZE`] bytes.
    pub fn parse(mut src: &[u8]) -> Result<Self> {
        debug_assert_eq!(src.len(), FRAME_HEADER_SIZE);
        let kind = StreamKind::from_wire_id(src.get_u8())?;
        let timestamp = Timestamp::from_secs(src.get_f64());
        let frame_number = src.get_u32();
        let payload_size = src.get_u32();
        let is_keyframe = src.get_u8() != 0;
        Ok(Self {
            kind,
            timestamp,
            frame_number,
            payload_size,
            is_keyframe,
        })
    }
}

/// Serialize a unit as header + payload. One packet always carries exactly
/// one encoded frame.
pub fn encode_packet(unit: &CompressedUnit) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + unit.payload.len());
    encode_packet_into(unit, &mut buf)?;
    Ok(buf.freeze())
}

pub fn encode_packet_into(unit: &CompressedUnit, dst: &mut BytesMut) -> Result<()> {
    let header = FrameHeader::for_unit(unit)?;
    dst.reserve(FRAME_HEADER_SIZE + unit.payload.len());
    header.write_to(dst);
    dst.put_slice(&unit.payload);
    Ok(())
}

/// Try to take one complete packet off the front of `src`.
///
/// Returns `Ok(None)` while the header or payload is still incomplete; no
/// bytes are consumed until the whole packet is available. A payload size
/// above `max_payload` is rejected as soon as the header is readable.
pub fn decode_packet(src: &mut BytesMut, max_payload: usize) -> Result<Option<CompressedUnit>> {
    if src.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    let header = FrameHeader::parse(&src[..FRAME_HEADER_SIZE])?;
    let payload_size = header.payload_size as usize;
    if payload_size > max_payload {
        return Err(ProtocolViolation::PayloadTooLarge {
            size: payload_size,
            max: max_payload,
        }
        .into());
    }

    let total = FRAME_HEADER_SIZE + payload_size;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(FRAME_HEADER_SIZE);
    let payload = src.split_to(payload_size).freeze();

    Ok(Some(CompressedUnit {
        kind: header.kind,
        timestamp: header.timestamp,
        frame_number: header.frame_number,
        is_keyframe: header.is_keyframe,
        payload,
    }))
}
