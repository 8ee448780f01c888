//! Sensor capture module
//!
//! Raw acquisition (camera, depth sensor, permissions) lives behind the
//! `SensorSession` capability. A session pushes frames into a `CaptureHandle`,
//! which never blocks the producer: each stream has a single slot and a new
//! frame is dropped while the previous one is still unconsumed.

pub mod synthetic;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::depth::DepthFrame;
use crate::error::Result;
use crate::pipeline::clock::CaptureClock;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::types::{ColorFrame, StreamKind, Timestamp};

pub use synthetic::{SyntheticConfig, SyntheticSession};

/// Source of time-correlated color and depth frames
#[async_trait]
pub trait SensorSession: Send {
    /// Whether the device can deliver both streams
    fn is_available(&self) -> bool;

    /// Begin delivering frames into `handle` until stopped
    async fn start(&mut self, handle: CaptureHandle) -> Result<()>;

    async fn stop(&mut self) -> Result<()>;
}

/// A frame of either stream as produced by the sensor
#[derive(Debug, Clone)]
pub enum SensorFrame {
    Color(ColorFrame),
    Depth(DepthFrame),
}

impl SensorFrame {
    pub fn kind(&self) -> StreamKind {
        match self {
            SensorFrame::Color(_) => StreamKind::Rgb,
            SensorFrame::Depth(_) => StreamKind::Depth,
        }
    }
}

/// A captured frame with its capture timestamp
#[derive(Debug, Clone)]
pub struct Timed<T> {
    pub frame: T,
    pub timestamp: Timestamp,
}

/// Outcome of handing a frame to a single-slot queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Accepted,
    /// The previous frame is still unconsumed
    Dropped,
    /// The consumer is gone
    Closed,
}

/// Non-blocking hand-off into a single-slot queue
pub(crate) fn offer<T>(tx: &mpsc::Sender<T>, item: T) -> Delivery {
    match tx.try_send(item) {
        Ok(()) => Delivery::Accepted,
        Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped,
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
    }
}

/// Receiving ends of a capture hand-off
pub struct CaptureStreams {
    pub color: mpsc::Receiver<Timed<ColorFrame>>,
    pub depth: mpsc::Receiver<Timed<DepthFrame>>,
}

/// Producer side handed to a sensor session
#[derive(Clone)]
pub struct CaptureHandle {
    clock: CaptureClock,
    color: mpsc::Sender<Timed<ColorFrame>>,
    depth: mpsc::Sender<Timed<DepthFrame>>,
    health: Option<Arc<PipelineHealth>>,
}

impl CaptureHandle {
    pub fn new(clock: CaptureClock) -> (Self, CaptureStreams) {
        let (color_tx, color_rx) = mpsc::channel(1);
        let (depth_tx, depth_rx) = mpsc::channel(1);
        (
            Self {
                clock,
                color: color_tx,
                depth: depth_tx,
                health: None,
            },
            CaptureStreams {
                color: color_rx,
                depth: depth_rx,
            },
        )
    }

    /// Count dropped frames in `health`
    pub fn with_health(mut self, health: Arc<PipelineHealth>) -> Self {
        self.health = Some(health);
        self
    }

    /// Clock both streams must be stamped with
    pub fn clock(&self) -> &CaptureClock {
        &self.clock
    }

    pub fn deliver_color(&self, frame: ColorFrame, timestamp: Timestamp) -> Delivery {
        let delivery = offer(&self.color, Timed { frame, timestamp });
        self.account(StreamKind::Rgb, delivery)
    }

    pub fn deliver_depth(&self, frame: DepthFrame, timestamp: Timestamp) -> Delivery {
        let delivery = offer(&self.depth, Timed { frame, timestamp });
        self.account(StreamKind::Depth, delivery)
    }

    pub fn deliver(&self, frame: SensorFrame, timestamp: Timestamp) -> Delivery {
        match frame {
            SensorFrame::Color(frame) => self.deliver_color(frame, timestamp),
            SensorFrame::Depth(frame) => self.deliver_depth(frame, timestamp),
        }
    }

    /// Both consumers are gone
    pub fn is_closed(&self) -> bool {
        self.color.is_closed() && self.depth.is_closed()
    }

    fn account(&self, kind: StreamKind, delivery: Delivery) -> Delivery {
        if delivery == Delivery::Dropped
            && let Some(health) = &self.health
        {
            health.stream(kind).record_frame_drop();
        }
        delivery
    }
}
