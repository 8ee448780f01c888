//! Transmit stage for the sender pipeline
//!
//! Forwards one stream's units onto the shared transport. The two streams
//! each run a transmit stage; the transport serializes them.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::net::TransportSender;
use crate::pipeline::PipelineStage;
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::types::{CompressedUnit, StreamKind};

pub struct TransmitStage<W> {
    kind: StreamKind,
    transport: TransportSender<W>,
    health: Arc<PipelineHealth>,
    input_rx: Option<mpsc::Receiver<CompressedUnit>>,
}

impl<W> TransmitStage<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(kind: StreamKind, transport: TransportSender<W>, health: Arc<PipelineHealth>) -> Self {
        Self {
            kind,
            transport,
            health,
            input_rx: None,
        }
    }

    pub fn set_input(&mut self, rx: mpsc::Receiver<CompressedUnit>) {
        self.input_rx = Some(rx);
    }
}

#[async_trait]
impl<W> PipelineStage for TransmitStage<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn run(&mut self) -> Result<()> {
        let mut input_rx = self
            .input_rx
            .take()
            .ok_or_else(|| anyhow::anyhow!("No input channel"))?;

        info!("TransmitStage({}): started", self.kind);
        let stats = self.health.stream(self.kind);
        let mut transmitted = 0u64;

        while let Some(unit) = input_rx.recv().await {
            let size = unit.size();
            let is_keyframe = unit.is_keyframe;
            let frame_number = unit.frame_number;
            match self.transport.send_unit(unit).await {
                Ok(()) => {
                    transmitted += 1;
                    stats.record_frame(size, is_keyframe);
                }
                Err(Error::Protocol(violation)) => {
                    stats.record_frame_drop();
                    warn!(
                        "TransmitStage({}): frame {} rejected: {}",
                        self.kind, frame_number, violation
                    );
                }
                Err(e) => {
                    self.health.record_connection_error();
                    return Err(anyhow::Error::new(e)
                        .context(format!("{} transmit failed after {} frames", self.kind, transmitted)));
                }
            }
        }

        info!(
            "TransmitStage({}): finished, {} frames transmitted",
            self.kind, transmitted
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        match self.kind {
            StreamKind::Rgb => "TransmitStage(RGB)",
            StreamKind::Depth => "TransmitStage(Depth)",
        }
    }
}
