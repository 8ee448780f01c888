//! Receiver pipeline coordinator
//!
//! Chains receive → decode stages for one connection and manages their
//! lifecycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use log::info;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::decoder::ColorDecoderFactory;
use crate::depth::{DepthCodec, DepthRange};
use crate::pipeline::PipelineStage;
use crate::pipeline::health::{HealthReporter, PipelineHealth};
use crate::pipeline::receiver::decode_stage::{ColorDecodeSession, DecodeStage};
use crate::pipeline::receiver::depth_stage::DepthDecodeStage;
use crate::pipeline::receiver::receive_stage::{DecodeQueue, ReceiveStage, Route};
use crate::pipeline::receiver::{DecodeMode, FrameSink};
use crate::pipeline::stage::spawn_stage;
use crate::pipeline::types::StreamKind;
use crate::protocol::FramePacketCodec;

/// Per-stream decode queue depth in `PerStream` mode
const DECODE_QUEUE: usize = 8;

#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    pub decode_mode: DecodeMode,
    pub consecutive_failure_reset: u32,
    pub max_payload_size: usize,
    pub depth_range: DepthRange,
    pub fps_window: Duration,
    pub log_interval: Duration,
}

impl From<&AppConfig> for ReceiverOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            decode_mode: config.receiver.decode_mode,
            consecutive_failure_reset: config.receiver.consecutive_failure_reset,
            max_payload_size: config.network.max_payload_size,
            depth_range: config.depth,
            fps_window: config.fps_window(),
            log_interval: config.log_interval(),
        }
    }
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Coordinates the receiver pipeline of one connection:
/// Receive → Decode (RGB, Depth) → FrameSink
pub struct ReceiverCoordinator {
    options: ReceiverOptions,
    factory: Arc<dyn ColorDecoderFactory>,
    health: Arc<PipelineHealth>,
}

impl ReceiverCoordinator {
    pub fn new(options: ReceiverOptions, factory: Arc<dyn ColorDecoderFactory>) -> Self {
        let health = Arc::new(PipelineHealth::with_fps_window(options.fps_window));
        Self {
            options,
            factory,
            health,
        }
    }

    /// Statistics of this connection
    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    /// Run the pipeline until the peer closes, `cancel` fires or a fatal
    /// error occurs.
    pub async fn run<R>(
        &self,
        reader: R,
        sink: Arc<dyn FrameSink>,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.health.record_connection();

        let session =
            ColorDecodeSession::new(self.factory.clone(), self.options.consecutive_failure_reset)?;
        let depth_codec = DepthCodec::new(self.options.depth_range);
        let codec = FramePacketCodec::new(self.options.max_payload_size);

        let reporter_cancel = cancel.child_token();
        let reporter = tokio::spawn(
            HealthReporter::new("Receiver", self.health.clone(), self.options.log_interval)
                .run(reporter_cancel.clone()),
        );

        let result = match self.options.decode_mode {
            DecodeMode::Inline => {
                let route = Route::Inline {
                    color: session,
                    depth: depth_codec,
                    sink,
                };
                let mut receive =
                    ReceiveStage::new(reader, codec, route, self.health.clone(), cancel);
                receive.run().await
            }
            DecodeMode::PerStream => {
                let (rgb_tx, rgb_rx) = mpsc::channel(DECODE_QUEUE);
                let (depth_tx, depth_rx) = mpsc::channel(DECODE_QUEUE);

                let mut decode = DecodeStage::new(session, self.health.clone(), sink.clone());
                decode.set_input(rgb_rx);
                let mut depth = DepthDecodeStage::new(depth_codec, self.health.clone(), sink);
                depth.set_input(depth_rx);

                let decode = spawn_stage(decode);
                let depth = spawn_stage(depth);

                let route = Route::PerStream {
                    rgb: DecodeQueue::new(StreamKind::Rgb, rgb_tx),
                    depth: DecodeQueue::new(StreamKind::Depth, depth_tx),
                };
                let mut receive =
                    ReceiveStage::new(reader, codec, route, self.health.clone(), cancel);
                let received = receive.run().await;
                // closing the queues lets both decoders drain and stop
                drop(receive.into_route());

                let decoded = decode.await?;
                let depth_decoded = depth.await?;
                // a failed decoder also makes the read loop fail; report the cause
                decoded.and(depth_decoded).and(received)
            }
        };

        reporter_cancel.cancel();
        let _ = reporter.await;
        info!("ReceiverCoordinator: connection finished");
        result
    }
}
