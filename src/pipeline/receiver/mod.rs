//! Receiver pipeline components
//!
//! This module contains the receiver-side pipeline stages:
//! - ReceiveStage: packet parsing, sequence tracking, routing by stream
//! - DecodeStage: color decoding with keyframe seeding and session reset
//! - DepthDecodeStage: depth transport decoding
//!
//! The receiver pipeline flow:
//! ```text
//! Network → Receive ─┬→ Decode (RGB)   → FrameSink
//!                    └→ Decode (Depth) → FrameSink
//! ```
//!
//! Each stream decodes on its own task behind a bounded queue that drops
//! rather than waits, so a slow color decoder does not hold back depth;
//! order is preserved within a stream only. `DecodeMode::Inline`
//! decodes on the read loop instead, which keeps callbacks in arrival order
//! across both streams.

pub mod coordinator;
pub mod decode_stage;
pub mod depth_stage;
pub mod receive_stage;

use serde::{Deserialize, Serialize};

use crate::depth::DepthFrame;
use crate::pipeline::types::{ColorFrame, Timestamp};

pub use coordinator::ReceiverCoordinator;
pub use decode_stage::{ColorDecodeSession, DecodeStage};
pub use depth_stage::DepthDecodeStage;
pub use receive_stage::ReceiveStage;

/// Where decoded frames go. Called from the decode tasks; implementations
/// must not block for long.
pub trait FrameSink: Send + Sync {
    fn on_color(&self, frame: ColorFrame, timestamp: Timestamp, frame_number: u32);

    fn on_depth(&self, frame: DepthFrame, timestamp: Timestamp, frame_number: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// One decode task per stream.
    ///
    /// Units reach the decode queues in arrival order, but the two tasks run
    /// independently: callbacks keep stream order, not cross-stream order.
    /// A decoder that falls behind has its newest units dropped.
    #[default]
    PerStream,
    /// Decode on the read loop; callbacks follow arrival order across both
    /// streams
    Inline,
}
