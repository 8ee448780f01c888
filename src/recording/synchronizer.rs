//! Dual-output synchronizer
//!
//! Writes color frames and depth visualizations into two files that share one
//! time origin. The lifecycle is `Idle → Active → Stopping → Idle`. Frames
//! are handed to the writer tasks through single-slot queues, so
//! `write_frame` never blocks the capture callback.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::capture::{CaptureStreams, Delivery, SensorFrame, Timed, offer};
use crate::config::RecordingConfig;
use crate::depth::{DepthFrame, DepthRange, DepthVisualizer};
use crate::error::{Error, Result};
use crate::pipeline::clock::{EpochPlacement, SessionEpoch};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::receiver::FrameSink;
use crate::pipeline::state::SessionState;
use crate::pipeline::types::{ColorFrame, PixelFormat, StreamKind, Timestamp};
use crate::recording::{MediaWriter, RawFrame, RecordingTarget, WriterFactory};

/// What happened to a frame offered to the synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Accepted,
    /// Not recording
    Inactive,
    /// No epoch yet and this stream may not set it
    DroppedNoEpoch,
    /// Captured before the epoch
    BeforeEpoch,
    /// The writer is still busy with the previous frame
    DroppedBusy,
    /// The writer has gone away
    Closed,
}

type WriterTask = JoinHandle<Result<Option<PathBuf>>>;

struct Inner {
    state: SessionState,
    epoch: Option<Arc<SessionEpoch>>,
    color_tx: Option<mpsc::Sender<Timed<ColorFrame>>>,
    depth_tx: Option<mpsc::Sender<Timed<DepthFrame>>>,
    tasks: Vec<(StreamKind, WriterTask)>,
    grace: Duration,
}

pub struct Synchronizer {
    inner: Mutex<Inner>,
    factory: Arc<dyn WriterFactory>,
    range: DepthRange,
    health: Arc<PipelineHealth>,
}

impl Synchronizer {
    pub fn new(factory: Arc<dyn WriterFactory>, range: DepthRange) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                epoch: None,
                color_tx: None,
                depth_tx: None,
                tasks: Vec::new(),
                grace: Duration::ZERO,
            }),
            factory,
            range,
            health: Arc::new(PipelineHealth::new()),
        }
    }

    pub fn health(&self) -> &Arc<PipelineHealth> {
        &self.health
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// The latched session epoch, if any
    pub fn epoch(&self) -> Option<Timestamp> {
        self.lock().epoch.as_ref().and_then(|epoch| epoch.get())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // counters and senders stay consistent even if a holder panicked
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create both outputs and begin accepting frames.
    ///
    /// Must be called inside a tokio runtime. Fails with a configuration
    /// error unless idle.
    pub fn start(&self, config: &RecordingConfig) -> Result<()> {
        let mut inner = self.lock();
        let active = SessionState::Active {
            started_at: Instant::now(),
        };
        if !inner.state.can_transition_to(&active) {
            return Err(Error::Configuration(format!(
                "cannot start recording while {}",
                inner.state
            )));
        }

        let target = RecordingTarget::timestamped(&config.output_dir, config.frame_rate);
        let color_writer = self.factory.create(StreamKind::Rgb, &target)?;
        let depth_writer = self.factory.create(StreamKind::Depth, &target)?;

        let (color_tx, color_rx) = mpsc::channel(1);
        let (depth_tx, depth_rx) = mpsc::channel(1);
        inner.tasks = vec![
            (
                StreamKind::Rgb,
                tokio::spawn(write_color(color_writer, color_rx)),
            ),
            (
                StreamKind::Depth,
                tokio::spawn(write_depth(
                    depth_writer,
                    DepthVisualizer::new(self.range),
                    depth_rx,
                )),
            ),
        ];
        inner.color_tx = Some(color_tx);
        inner.depth_tx = Some(depth_tx);
        inner.epoch = Some(Arc::new(SessionEpoch::new(config.epoch_stream)));
        inner.grace = Duration::from_millis(config.grace_timeout_ms);
        inner.state = active;

        info!(
            "Synchronizer: recording {} (epoch from {:?})",
            target.dir.join(&target.stem).display(),
            config.epoch_stream
        );
        Ok(())
    }

    /// Offer one captured frame. Never blocks; a no-op unless active.
    pub fn write_frame(&self, frame: SensorFrame, timestamp: Timestamp) -> WriteOutcome {
        let inner = self.lock();
        if !inner.state.is_active() {
            return WriteOutcome::Inactive;
        }
        let Some(epoch) = &inner.epoch else {
            return WriteOutcome::Inactive;
        };

        let kind = frame.kind();
        let relative = match epoch.place(kind, timestamp) {
            EpochPlacement::Relative(relative) => relative,
            EpochPlacement::NoEpoch => {
                debug!("Synchronizer: {} frame before epoch is set, dropped", kind);
                return WriteOutcome::DroppedNoEpoch;
            }
            EpochPlacement::BeforeEpoch => return WriteOutcome::BeforeEpoch,
        };

        let delivery = match (frame, &inner.color_tx, &inner.depth_tx) {
            (SensorFrame::Color(frame), Some(tx), _) => offer(
                tx,
                Timed {
                    frame,
                    timestamp: relative,
                },
            ),
            (SensorFrame::Depth(frame), _, Some(tx)) => offer(
                tx,
                Timed {
                    frame,
                    timestamp: relative,
                },
            ),
            _ => Delivery::Closed,
        };

        let stats = self.health.stream(kind);
        match delivery {
            Delivery::Accepted => WriteOutcome::Accepted,
            Delivery::Dropped => {
                stats.record_frame_drop();
                WriteOutcome::DroppedBusy
            }
            Delivery::Closed => WriteOutcome::Closed,
        }
    }

    /// Signal end of stream to both outputs and wait for them to finalize.
    ///
    /// Waits at most the configured grace timeout. On failure or timeout the
    /// outputs that did finalize are kept and listed in the error.
    pub async fn stop(&self) -> Result<Vec<PathBuf>> {
        let (tasks, grace) = {
            let mut inner = self.lock();
            if !inner.state.can_transition_to(&SessionState::Stopping) {
                return Err(Error::Configuration(format!(
                    "cannot stop recording while {}",
                    inner.state
                )));
            }
            inner.state = SessionState::Stopping;
            // dropping the senders is the end-of-stream signal
            inner.color_tx = None;
            inner.depth_tx = None;
            (std::mem::take(&mut inner.tasks), inner.grace)
        };
        info!("Synchronizer: stopping, waiting up to {:?} for outputs", grace);

        let deadline = tokio::time::Instant::now() + grace;
        let mut finalized = Vec::new();
        let mut failures = Vec::new();
        for (kind, task) in tasks {
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(Ok(Some(path)))) => finalized.push(path),
                Ok(Ok(Ok(None))) => warn!("Synchronizer: {} output received no frames", kind),
                Ok(Ok(Err(e))) => failures.push(format!("{}: {}", kind, e)),
                Ok(Err(e)) => failures.push(format!("{}: writer task failed: {}", kind, e)),
                // the task keeps running detached; its file may still complete
                Err(_) => failures.push(format!("{}: finalize timed out", kind)),
            }
        }

        {
            let mut inner = self.lock();
            inner.epoch = None;
            inner.state = SessionState::Idle;
        }

        if failures.is_empty() {
            info!("Synchronizer: stopped, {} outputs written", finalized.len());
            return Ok(finalized);
        }
        error!("Synchronizer: stop failed: {}", failures.join("; "));
        Err(Error::Recording(format!(
            "{} (kept: {})",
            failures.join("; "),
            finalized
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Feed captured frames until both capture queues close
    pub async fn record_from(&self, mut streams: CaptureStreams) {
        let mut color_open = true;
        let mut depth_open = true;
        while color_open || depth_open {
            tokio::select! {
                frame = streams.color.recv(), if color_open => match frame {
                    Some(Timed { frame, timestamp }) => {
                        self.write_frame(SensorFrame::Color(frame), timestamp);
                    }
                    None => color_open = false,
                },
                frame = streams.depth.recv(), if depth_open => match frame {
                    Some(Timed { frame, timestamp }) => {
                        self.write_frame(SensorFrame::Depth(frame), timestamp);
                    }
                    None => depth_open = false,
                },
            }
        }
    }
}

impl FrameSink for Synchronizer {
    fn on_color(&self, frame: ColorFrame, timestamp: Timestamp, _frame_number: u32) {
        self.write_frame(SensorFrame::Color(frame), timestamp);
    }

    fn on_depth(&self, frame: DepthFrame, timestamp: Timestamp, _frame_number: u32) {
        self.write_frame(SensorFrame::Depth(frame), timestamp);
    }
}

async fn write_color(
    mut writer: Box<dyn MediaWriter>,
    mut rx: mpsc::Receiver<Timed<ColorFrame>>,
) -> Result<Option<PathBuf>> {
    let mut failed = 0u64;
    while let Some(Timed { frame, timestamp }) = rx.recv().await {
        let raw = RawFrame {
            width: frame.width,
            height: frame.height,
            format: frame.format,
            data: &frame.data,
        };
        if let Err(e) = writer.append(raw, timestamp).await {
            failed += 1;
            warn!("Synchronizer: color frame at {} not written: {}", timestamp, e);
        }
    }
    if failed > 0 {
        warn!("Synchronizer: {} color frames not written", failed);
    }
    writer.finalize().await
}

async fn write_depth(
    mut writer: Box<dyn MediaWriter>,
    mut visualizer: DepthVisualizer,
    mut rx: mpsc::Receiver<Timed<DepthFrame>>,
) -> Result<Option<PathBuf>> {
    let mut failed = 0u64;
    while let Some(Timed { frame, timestamp }) = rx.recv().await {
        let raw = RawFrame {
            width: frame.width,
            height: frame.height,
            format: PixelFormat::Gray8,
            data: visualizer.render(&frame),
        };
        if let Err(e) = writer.append(raw, timestamp).await {
            failed += 1;
            warn!("Synchronizer: depth frame at {} not written: {}", timestamp, e);
        }
    }
    if failed > 0 {
        warn!("Synchronizer: {} depth frames not written", failed);
    }
    writer.finalize().await
}
