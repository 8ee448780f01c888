//! Pipeline layer
//!
//! Separates concerns between:
//! - Control/Coordination: session state machine and lifecycle
//! - Data Transport: channels and backpressure handling
//! - Media Processing: capture, encode, decode stages
//!
//! # Architecture
//!
//! Stages communicate via channels:
//! - Each stage runs in its own async task
//! - Stages implement the `PipelineStage` trait
//! - Coordinators chain stages together and manage lifecycle
//! - `SessionEpoch` puts both streams on one session timeline
//! - Health monitoring tracks per-stream sequence, rate and errors

pub mod clock;
pub mod health;
pub mod receiver;
pub mod sender;
pub mod stage;
pub mod state;
pub mod types;

pub use clock::{CaptureClock, EpochPolicy, SessionEpoch};
pub use health::{HealthSummary, PipelineHealth};
pub use stage::PipelineStage;
pub use state::SessionState;
pub use types::{ColorFrame, CompressedUnit, StreamKind, Timestamp};
