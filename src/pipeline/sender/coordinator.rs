//! Sender pipeline coordinator
//!
//! Chains capture → encode → transmit stages for both streams and manages
//! their lifecycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::assets::STATS_LOG_INTERVAL_SECS;
use crate::capture::SensorSession;
use crate::depth::DepthCodec;
use crate::encoder::HardwareEncoder;
use crate::error::Error;
use crate::net::TransportSender;
use crate::pipeline::clock::{CaptureClock, EpochPolicy, SessionEpoch};
use crate::pipeline::health::{HealthReporter, PipelineHealth};
use crate::pipeline::sender::capture_stage::CaptureStage;
use crate::pipeline::sender::encode_stage::{ColorEncodeStage, DepthEncodeStage};
use crate::pipeline::sender::transmit_stage::TransmitStage;
use crate::pipeline::stage::run_stage;
use crate::pipeline::state::SessionState;
use crate::pipeline::types::StreamKind;

/// Encoded units buffered between an encode stage and its transmit stage
const UNIT_QUEUE_DEPTH: usize = 4;

/// Coordinates the sender pipeline: Capture → Encode → Transmit
///
/// Both streams share one session epoch, latched by whichever stream
/// delivers first, and one transport.
pub struct SenderCoordinator<W> {
    state: SessionState,
    clock: CaptureClock,
    epoch: Arc<SessionEpoch>,
    health: Arc<PipelineHealth>,
    log_interval: Duration,

    capture: Option<CaptureStage>,
    stages: JoinSet<Result<()>>,
    transport: Option<TransportSender<W>>,
    reporter: Option<CancellationToken>,
}

impl<W> SenderCoordinator<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(clock: CaptureClock) -> Self {
        Self {
            state: SessionState::Idle,
            clock,
            epoch: Arc::new(SessionEpoch::new(EpochPolicy::Any)),
            health: Arc::new(PipelineHealth::new()),
            log_interval: Duration::from_secs(STATS_LOG_INTERVAL_SECS),
            capture: None,
            stages: JoinSet::new(),
            transport: None,
            reporter: None,
        }
    }

    pub fn with_log_interval(mut self, interval: Duration) -> Self {
        self.log_interval = interval;
        self
    }

    pub fn clock(&self) -> &CaptureClock {
        &self.clock
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Start capturing and streaming over `transport`
    pub async fn start(
        &mut self,
        session: Box<dyn SensorSession>,
        encoder: Box<dyn HardwareEncoder>,
        depth_codec: DepthCodec,
        transport: TransportSender<W>,
    ) -> Result<()> {
        let active = SessionState::Active {
            started_at: Instant::now(),
        };
        if !self.state.can_transition_to(&active) {
            anyhow::bail!("cannot start sender while {}", self.state);
        }
        self.epoch.reset();

        let mut capture = CaptureStage::new(session, self.clock.clone(), self.health.clone());
        let streams = capture.start_capture().await?;

        let (color_tx, color_rx) = mpsc::channel(UNIT_QUEUE_DEPTH);
        let mut color_encode = ColorEncodeStage::new(encoder, self.epoch.clone(), self.health.clone());
        color_encode.set_input(streams.color);
        color_encode.set_output(color_tx);
        let mut color_transmit =
            TransmitStage::new(StreamKind::Rgb, transport.clone(), self.health.clone());
        color_transmit.set_input(color_rx);

        let (depth_tx, depth_rx) = mpsc::channel(UNIT_QUEUE_DEPTH);
        let mut depth_encode =
            DepthEncodeStage::new(depth_codec, self.epoch.clone(), self.health.clone());
        depth_encode.set_input(streams.depth);
        depth_encode.set_output(depth_tx);
        let mut depth_transmit =
            TransmitStage::new(StreamKind::Depth, transport.clone(), self.health.clone());
        depth_transmit.set_input(depth_rx);

        self.stages.spawn(run_stage(color_encode));
        self.stages.spawn(run_stage(color_transmit));
        self.stages.spawn(run_stage(depth_encode));
        self.stages.spawn(run_stage(depth_transmit));

        let reporter = CancellationToken::new();
        tokio::spawn(
            HealthReporter::new("Sender", self.health.clone(), self.log_interval)
                .run(reporter.clone()),
        );

        self.capture = Some(capture);
        self.transport = Some(transport);
        self.reporter = Some(reporter);
        self.state = active;
        info!("SenderCoordinator: pipeline running");
        Ok(())
    }

    /// Stream until cancelled or until a stage ends, then stop.
    ///
    /// Returns the first stage failure, if any.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        if !self.state.is_active() {
            anyhow::bail!("sender is not running");
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                info!("SenderCoordinator: stop requested");
                Ok(())
            }
            Some(joined) = self.stages.join_next() => {
                let outcome = flatten(joined);
                if outcome.is_ok() {
                    info!("SenderCoordinator: a stage finished, stopping");
                }
                outcome
            }
        };

        let stopped = self.stop().await;
        outcome.and(stopped)
    }

    /// Stop capture, drain the stages and close the transport
    pub async fn stop(&mut self) -> Result<()> {
        if !self.state.can_transition_to(&SessionState::Stopping) {
            return Err(Error::Configuration(format!(
                "cannot stop sender while {}",
                self.state
            ))
            .into());
        }
        self.state = SessionState::Stopping;

        let mut first_error = None;
        if let Some(mut capture) = self.capture.take()
            && let Err(e) = capture.stop_capture().await
        {
            first_error.get_or_insert(e);
        }

        // stages drain once capture lets go of its queues
        while let Some(joined) = self.stages.join_next().await {
            if let Err(e) = flatten(joined) {
                first_error.get_or_insert(e);
            }
        }

        if let Some(transport) = self.transport.take()
            && let Err(e) = transport.close().await
        {
            warn!("SenderCoordinator: closing transport failed: {}", e);
        }
        if let Some(reporter) = self.reporter.take() {
            reporter.cancel();
        }

        self.epoch.reset();
        self.state = SessionState::Idle;
        info!("SenderCoordinator: pipeline stopped ({})", self.health.summary());

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn flatten(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    joined.context("pipeline stage panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{SyntheticConfig, SyntheticSession};
    use crate::depth::DepthRange;
    use crate::encoder::JpegEncoder;
    use crate::protocol::FramePacketCodec;
    use crate::protocol::packet::decode_packet;
    use bytes::BytesMut;
    use tokio::io::AsyncReadExt;

    fn small_session() -> Box<dyn SensorSession> {
        Box::new(SyntheticSession::new(SyntheticConfig {
            color_width: 32,
            color_height: 24,
            depth_width: 16,
            depth_height: 12,
            fps: 60,
            ..SyntheticConfig::default()
        }))
    }

    #[tokio::test]
    async fn test_streams_numbered_units_on_one_timeline() {
        let (client, mut server) = tokio::io::duplex(1 << 20);
        let transport = TransportSender::new(client, FramePacketCodec::default());
        let mut sender = SenderCoordinator::new(CaptureClock::new());

        sender
            .start(
                small_session(),
                Box::new(JpegEncoder::default()),
                DepthCodec::new(DepthRange::default()),
                transport,
            )
            .await
            .unwrap();
        assert!(sender.state().is_active());

        let reader = tokio::spawn(async move {
            let mut bytes = Vec::new();
            server.read_to_end(&mut bytes).await.unwrap();
            bytes
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        sender.stop().await.unwrap();
        assert!(sender.state().is_idle());

        let mut buf = BytesMut::from(&reader.await.unwrap()[..]);
        let mut units = Vec::new();
        while let Some(unit) = decode_packet(&mut buf, usize::MAX).unwrap() {
            units.push(unit);
        }
        assert!(buf.is_empty());

        for kind in StreamKind::ALL {
            let numbers: Vec<u32> = units
                .iter()
                .filter(|u| u.kind == kind)
                .map(|u| u.frame_number)
                .collect();
            assert!(!numbers.is_empty(), "no {} units", kind);
            assert!(numbers.windows(2).all(|w| w[0] < w[1]));
        }
        // the earliest unit on the wire sits at or near the epoch
        let earliest = units
            .iter()
            .map(|u| u.timestamp.secs)
            .fold(f64::INFINITY, f64::min);
        assert!(earliest < 0.1);
        assert!(units.iter().all(|u| u.timestamp.secs >= 0.0));
        assert!(sender.health().stream(StreamKind::Rgb).frames() > 0);
    }

    #[tokio::test]
    async fn test_lost_peer_ends_the_session() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let transport = TransportSender::new(client, FramePacketCodec::default());
        let mut sender = SenderCoordinator::new(CaptureClock::new());
        sender
            .start(
                small_session(),
                Box::new(JpegEncoder::default()),
                DepthCodec::new(DepthRange::default()),
                transport,
            )
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), sender.run(CancellationToken::new()))
            .await
            .unwrap();
        assert!(result.is_err());
        assert!(sender.state().is_idle());
        assert!(sender.health().summary().connection_errors >= 1);
    }

    #[tokio::test]
    async fn test_cannot_start_twice() {
        let (client, _server) = tokio::io::duplex(1 << 20);
        let transport = TransportSender::new(client, FramePacketCodec::default());
        let mut sender = SenderCoordinator::new(CaptureClock::new());
        sender
            .start(
                small_session(),
                Box::new(JpegEncoder::default()),
                DepthCodec::new(DepthRange::default()),
                transport.clone(),
            )
            .await
            .unwrap();
        assert!(
            sender
                .start(
                    small_session(),
                    Box::new(JpegEncoder::default()),
                    DepthCodec::new(DepthRange::default()),
                    transport,
                )
                .await
                .is_err()
        );
        sender.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_while_idle_is_rejected() {
        let mut sender: SenderCoordinator<tokio::io::DuplexStream> =
            SenderCoordinator::new(CaptureClock::new());
        let err = sender.stop().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Configuration(_))
        ));
        assert!(sender.state().is_idle());
    }
}
