//! Encode stages for the sender pipeline
//!
//! One stage per stream. Each places captured frames on the session timeline,
//! numbers them and compresses them into units for the transmit stage.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::capture::Timed;
use crate::depth::{DepthCodec, DepthFrame};
use crate::encoder::HardwareEncoder;
use crate::pipeline::PipelineStage;
use crate::pipeline::clock::{EpochPlacement, SessionEpoch};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::types::{ColorFrame, CompressedUnit, StreamKind, Timestamp};

/// Session-relative timestamps and per-stream frame numbers
pub struct UnitStamper {
    kind: StreamKind,
    epoch: Arc<SessionEpoch>,
    next_frame_number: u32,
}

impl UnitStamper {
    pub fn new(kind: StreamKind, epoch: Arc<SessionEpoch>) -> Self {
        Self {
            kind,
            epoch,
            next_frame_number: 0,
        }
    }

    /// Relative timestamp and frame number for a captured frame, or `None`
    /// if the frame cannot be placed on the session timeline.
    ///
    /// A number is consumed even if encoding later fails, so the receiver
    /// sees the loss as a gap.
    pub fn stamp(&mut self, timestamp: Timestamp) -> Option<(Timestamp, u32)> {
        match self.epoch.place(self.kind, timestamp) {
            EpochPlacement::Relative(relative) => {
                let frame_number = self.next_frame_number;
                self.next_frame_number = self.next_frame_number.wrapping_add(1);
                Some((relative, frame_number))
            }
            placement => {
                debug!("EncodeStage: {} frame not placed: {:?}", self.kind, placement);
                None
            }
        }
    }
}

/// Encode stage for the color stream
pub struct ColorEncodeStage {
    encoder: Box<dyn HardwareEncoder>,
    stamper: UnitStamper,
    health: Arc<PipelineHealth>,
    input_rx: Option<mpsc::Receiver<Timed<ColorFrame>>>,
    output_tx: Option<mpsc::Sender<CompressedUnit>>,
}

impl ColorEncodeStage {
    pub fn new(
        encoder: Box<dyn HardwareEncoder>,
        epoch: Arc<SessionEpoch>,
        health: Arc<PipelineHealth>,
    ) -> Self {
        Self {
            encoder,
            stamper: UnitStamper::new(StreamKind::Rgb, epoch),
            health,
            input_rx: None,
            output_tx: None,
        }
    }

    pub fn set_input(&mut self, rx: mpsc::Receiver<Timed<ColorFrame>>) {
        self.input_rx = Some(rx);
    }

    pub fn set_output(&mut self, tx: mpsc::Sender<CompressedUnit>) {
        self.output_tx = Some(tx);
    }
}

#[async_trait]
impl PipelineStage for ColorEncodeStage {
    async fn run(&mut self) -> Result<()> {
        let mut input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No input channel"))?;
        let output_tx = self
            .output_tx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No output channel"))?;

        info!("ColorEncodeStage: started ({})", self.encoder.name());
        let mut total_frames = 0u64;

        while let Some(captured) = input_rx.recv().await {
            let Some((timestamp, frame_number)) = self.stamper.stamp(captured.timestamp) else {
                continue;
            };
            let encoded = match self.encoder.encode(captured.frame).await {
                Ok(encoded) => encoded,
                Err(e) => {
                    self.health.stream(StreamKind::Rgb).record_frame_drop();
                    warn!("ColorEncodeStage: frame {} failed: {}", frame_number, e);
                    continue;
                }
            };
            total_frames += 1;

            let unit =
                CompressedUnit::rgb(timestamp, frame_number, encoded.is_keyframe, encoded.data);
            if output_tx.send(unit).await.is_err() {
                info!("ColorEncodeStage: output channel closed");
                break;
            }
        }

        info!("ColorEncodeStage: finished after {} frames", total_frames);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ColorEncodeStage"
    }
}

/// Encode stage for the depth stream
pub struct DepthEncodeStage {
    codec: DepthCodec,
    stamper: UnitStamper,
    health: Arc<PipelineHealth>,
    input_rx: Option<mpsc::Receiver<Timed<DepthFrame>>>,
    output_tx: Option<mpsc::Sender<CompressedUnit>>,
}

impl DepthEncodeStage {
    pub fn new(codec: DepthCodec, epoch: Arc<SessionEpoch>, health: Arc<PipelineHealth>) -> Self {
        Self {
            codec,
            stamper: UnitStamper::new(StreamKind::Depth, epoch),
            health,
            input_rx: None,
            output_tx: None,
        }
    }

    pub fn set_input(&mut self, rx: mpsc::Receiver<Timed<DepthFrame>>) {
        self.input_rx = Some(rx);
    }

    pub fn set_output(&mut self, tx: mpsc::Sender<CompressedUnit>) {
        self.output_tx = Some(tx);
    }
}

#[async_trait]
impl PipelineStage for DepthEncodeStage {
    async fn run(&mut self) -> Result<()> {
        let mut input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No input channel"))?;
        let output_tx = self
            .output_tx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No output channel"))?;

        info!("DepthEncodeStage: started");
        let mut total_frames = 0u64;

        while let Some(captured) = input_rx.recv().await {
            let Some((timestamp, frame_number)) = self.stamper.stamp(captured.timestamp) else {
                continue;
            };
            let codec = self.codec.clone();
            let frame = captured.frame;
            let encoded = tokio::task::spawn_blocking(move || codec.encode_depth(&frame)).await?;
            let payload = match encoded {
                Ok(payload) => payload,
                Err(e) => {
                    self.health.stream(StreamKind::Depth).record_frame_drop();
                    warn!("DepthEncodeStage: frame {} failed: {}", frame_number, e);
                    continue;
                }
            };
            total_frames += 1;

            if output_tx
                .send(CompressedUnit::depth(timestamp, frame_number, payload))
                .await
                .is_err()
            {
                info!("DepthEncodeStage: output channel closed");
                break;
            }
        }

        info!("DepthEncodeStage: finished after {} frames", total_frames);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DepthEncodeStage"
    }
}
