//! Frame packet codec for framed async I/O
//!
//! Plugs the packet format into `tokio_util::codec` so a TCP stream can be
//! consumed as a `Stream` of units (receiver) and fed as a `Sink` (sender).
//! The decoder only yields complete packets; partial headers and payloads stay
//! buffered and the reading task is suspended until more bytes arrive.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::assets::MAX_FRAME_PAYLOAD_SIZE;
use crate::error::{Error, ProtocolViolation};
use crate::pipeline::types::CompressedUnit;
use crate::protocol::packet::{decode_packet, encode_packet_into};

#[derive(Debug, Clone, Copy)]
pub struct FramePacketCodec {
    max_payload: usize,
}

impl FramePacketCodec {
    pub fn new(max_payload: usize) -> Self {
        Self { max_payload }
    }
}

impl Default for FramePacketCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_PAYLOAD_SIZE)
    }
}

impl Decoder for FramePacketCodec {
    type Item = CompressedUnit;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_packet(src, self.max_payload)
    }
}

impl Encoder<CompressedUnit> for FramePacketCodec {
    type Error = Error;

    fn encode(&mut self, unit: CompressedUnit, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if unit.payload.len() > self.max_payload {
            return Err(ProtocolViolation::PayloadTooLarge {
                size: unit.payload.len(),
                max: self.max_payload,
            }
            .into());
        }
        encode_packet_into(&unit, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{StreamKind, Timestamp};
    use crate::protocol::packet::encode_packet;
    use bytes::Bytes;
    use futures_util::StreamExt;
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::FramedRead;

    fn units() -> Vec<CompressedUnit> {
        let mut units = Vec::new();
        for i in 0..6u32 {
            let payload = Bytes::from((0..(i * 37 + 1)).map(|b| b as u8).collect::<Vec<_>>());
            if i % 3 == 0 {
                units.push(CompressedUnit::depth(
                    Timestamp::from_secs(i as f64 / 15.0),
                    i / 3,
                    payload,
                ));
            } else {
                units.push(CompressedUnit::rgb(
                    Timestamp::from_secs(i as f64 / 30.0),
                    i,
                    i == 1,
                    payload,
                ));
            }
        }
        units
    }

    fn wire_bytes(units: &[CompressedUnit]) -> Vec<u8> {
        units
            .iter()
            .flat_map(|u| encode_packet(u).unwrap().to_vec())
            .collect()
    }

    #[test]
    fn test_any_chunk_size_reassembles_all_units() {
        let expected = units();
        let wire = wire_bytes(&expected);

        for chunk in [1usize, 2, 5, 17, 18, 19, 64, wire.len()] {
            let mut codec = FramePacketCodec::default();
            let mut buf = BytesMut::new();
            let mut decoded = Vec::new();

            for piece in wire.chunks(chunk) {
                buf.extend_from_slice(piece);
                while let Some(unit) = codec.decode(&mut buf).unwrap() {
                    decoded.push(unit);
                }
            }

            assert_eq!(decoded, expected, "chunk size {}", chunk);
            assert!(buf.is_empty());
        }
    }

    #[tokio::test]
    async fn test_framed_read_one_byte_at_a_time() {
        let expected = units();
        let wire = wire_bytes(&expected);
        let (mut tx, rx) = tokio::io::duplex(8);

        let writer = tokio::spawn(async move {
            for byte in wire {
                tx.write_all(&[byte]).await.unwrap();
            }
        });

        let mut framed = FramedRead::new(rx, FramePacketCodec::default());
        let mut decoded = Vec::new();
        while let Some(unit) = framed.next().await {
            decoded.push(unit.unwrap());
        }
        writer.await.unwrap();

        assert_eq!(decoded.len(), expected.len());
        assert_eq!(decoded, expected);
        assert_eq!(decoded[0].kind, StreamKind::Depth);
    }

    #[test]
    fn test_encoder_rejects_oversized_unit() {
        let mut codec = FramePacketCodec::new(4);
        let unit = CompressedUnit::depth(Timestamp::ZERO, 0, Bytes::from_static(b"too long"));
        let mut dst = BytesMut::new();
        assert!(codec.encode(unit, &mut dst).is_err());
        assert!(dst.is_empty());
    }
}
