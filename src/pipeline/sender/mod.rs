//! Sender pipeline components
//!
//! This module contains the sender-side pipeline stages:
//! - CaptureStage: sensor session lifecycle
//! - ColorEncodeStage / DepthEncodeStage: timeline placement and compression
//! - TransmitStage: framing onto the shared transport
//!
//! The sender pipeline flow, once per stream:
//! ```text
//! Capture → Encode → Transmit → Network
//! ```

pub mod capture_stage;
pub mod coordinator;
pub mod encode_stage;
pub mod transmit_stage;

pub use capture_stage::CaptureStage;
pub use coordinator::SenderCoordinator;
pub use encode_stage::{ColorEncodeStage, DepthEncodeStage};
pub use transmit_stage::TransmitStage;
