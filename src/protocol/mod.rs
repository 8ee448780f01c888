//! Wire protocol for the multiplexed color + depth stream
//!
//! Each encoded frame travels as one self-describing packet: a fixed 18-byte
//! header followed by the payload. The two streams share one byte channel and
//! are interleaved purely by arrival order; only the order within a stream is
//! guaranteed. There is no handshake, version field, sync marker or checksum.

pub mod codec;
pub mod packet;

pub use codec::FramePacketCodec;
pub use packet::{FrameHeader, decode_packet, encode_packet};
