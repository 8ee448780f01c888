//! Decode stage for the receiver pipeline
//!
//! Feeds color units into a streaming decoder session. The session is seeded
//! by a keyframe; a failed unit is dropped and counted without restarting the
//! session. After too many consecutive failures the session is torn down and
//! rebuilt at the next keyframe. Only a failure to build a session is fatal.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::decoder::{ColorDecoder, ColorDecoderFactory};
use crate::pipeline::PipelineStage;
use crate::pipeline::health::{PipelineHealth, StreamStats};
use crate::pipeline::receiver::FrameSink;
use crate::pipeline::types::{ColorFrame, CompressedUnit, StreamKind};

/// Keyframe-seeded color decoder session with failure accounting
pub struct ColorDecodeSession {
    factory: Arc<dyn ColorDecoderFactory>,
    decoder: Option<Box<dyn ColorDecoder>>,
    waiting_for_keyframe: bool,
    consecutive_failures: u32,
    reset_after: u32,
    resets: u64,
}

impl ColorDecodeSession {
    /// Build the first decoder session.
    pub fn new(factory: Arc<dyn ColorDecoderFactory>, reset_after: u32) -> Result<Self> {
        let decoder = factory
            .create()
            .context("failed to create color decoder")?;
        Ok(Self {
            factory,
            decoder: Some(decoder),
            waiting_for_keyframe: true,
            consecutive_failures: 0,
            reset_after: reset_after.max(1),
            resets: 0,
        })
    }

    /// Number of times the session was torn down after repeated failures
    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn is_waiting_for_keyframe(&self) -> bool {
        self.waiting_for_keyframe
    }

    /// Decode one unit. `Ok(None)` when the unit was skipped, failed or the
    /// decoder is still buffering.
    pub fn handle(&mut self, unit: &CompressedUnit, stats: &StreamStats) -> Result<Option<ColorFrame>> {
        if self.waiting_for_keyframe {
            if !unit.is_keyframe {
                debug!(
                    "DecodeStage: skipping frame {} while waiting for keyframe",
                    unit.frame_number
                );
                return Ok(None);
            }
            self.waiting_for_keyframe = false;
            info!("DecodeStage: keyframe {} seeds decoder", unit.frame_number);
        }

        let mut decoder = match self.decoder.take() {
            Some(decoder) => decoder,
            None => self
                .factory
                .create()
                .context("failed to rebuild color decoder")?,
        };

        match decoder.decode(&unit.payload, unit.is_keyframe) {
            Ok(frame) => {
                self.consecutive_failures = 0;
                self.decoder = Some(decoder);
                Ok(frame)
            }
            Err(e) => {
                self.consecutive_failures += 1;
                stats.record_decode_failure();
                warn!("DecodeStage: frame {} failed: {}", unit.frame_number, e);

                if self.consecutive_failures >= self.reset_after {
                    warn!(
                        "DecodeStage: {} consecutive failures, resetting (waiting for keyframe)",
                        self.consecutive_failures
                    );
                    // session is dropped here and rebuilt at the next keyframe
                    self.consecutive_failures = 0;
                    self.waiting_for_keyframe = true;
                    self.resets += 1;
                } else {
                    self.decoder = Some(decoder);
                }
                Ok(None)
            }
        }
    }
}

/// Decode stage: turns color units into frames for the sink
pub struct DecodeStage {
    session: ColorDecodeSession,
    health: Arc<PipelineHealth>,
    sink: Arc<dyn FrameSink>,
    input_rx: Option<mpsc::Receiver<CompressedUnit>>,
}

impl DecodeStage {
    pub fn new(
        session: ColorDecodeSession,
        health: Arc<PipelineHealth>,
        sink: Arc<dyn FrameSink>,
    ) -> Self {
        Self {
            session,
            health,
            sink,
            input_rx: None,
        }
    }

    /// Set the input channel (color units from the receive stage)
    pub fn set_input(&mut self, rx: mpsc::Receiver<CompressedUnit>) {
        self.input_rx = Some(rx);
    }
}

#[async_trait]
impl PipelineStage for DecodeStage {
    async fn run(&mut self) -> Result<()> {
        let mut input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No input channel"))?;

        info!("DecodeStage: started");
        let stats = self.health.stream(StreamKind::Rgb);
        let mut total_units = 0u64;
        let mut decoded_frames = 0u64;

        while let Some(unit) = input_rx.recv().await {
            total_units += 1;
            if let Some(frame) = self.session.handle(&unit, stats)? {
                decoded_frames += 1;
                self.sink
                    .on_color(frame, unit.timestamp, unit.frame_number);
            }
        }

        info!(
            "DecodeStage: finished ({} units, {} decoded frames, {} resets)",
            total_units,
            decoded_frames,
            self.session.resets()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DecodeStage"
    }
}
