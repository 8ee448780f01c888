//! Depth decode stage for the receiver pipeline

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::mpsc;

use crate::depth::{DepthCodec, DepthFrame};
use crate::pipeline::PipelineStage;
use crate::pipeline::health::{PipelineHealth, StreamStats};
use crate::pipeline::receiver::FrameSink;
use crate::pipeline::types::{CompressedUnit, StreamKind};

/// Decode one depth unit; a corrupt payload is counted and dropped.
pub fn decode_depth_unit(
    codec: &DepthCodec,
    unit: &CompressedUnit,
    stats: &StreamStats,
) -> Option<DepthFrame> {
    match codec.decode_depth(&unit.payload) {
        Ok(frame) => Some(frame),
        Err(e) => {
            stats.record_decode_failure();
            warn!("DepthDecodeStage: frame {} failed: {}", unit.frame_number, e);
            None
        }
    }
}

pub struct DepthDecodeStage {
    codec: DepthCodec,
    health: Arc<PipelineHealth>,
    sink: Arc<dyn FrameSink>,
    input_rx: Option<mpsc::Receiver<CompressedUnit>>,
}

impl DepthDecodeStage {
    pub fn new(codec: DepthCodec, health: Arc<PipelineHealth>, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            codec,
            health,
            sink,
            input_rx: None,
        }
    }

    pub fn set_input(&mut self, rx: mpsc::Receiver<CompressedUnit>) {
        self.input_rx = Some(rx);
    }
}

#[async_trait]
impl PipelineStage for DepthDecodeStage {
    async fn run(&mut self) -> Result<()> {
        let mut input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No input channel"))?;

        info!("DepthDecodeStage: started");
        let stats = self.health.stream(StreamKind::Depth);
        let mut decoded_frames = 0u64;

        while let Some(unit) = input_rx.recv().await {
            if let Some(frame) = decode_depth_unit(&self.codec, &unit, stats) {
                decoded_frames += 1;
                self.sink.on_depth(frame, unit.timestamp, unit.frame_number);
            }
        }

        info!("DepthDecodeStage: finished ({} decoded frames)", decoded_frames);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "DepthDecodeStage"
    }
}
