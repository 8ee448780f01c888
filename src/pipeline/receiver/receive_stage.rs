//! Receive stage for the receiver pipeline
//!
//! The single sequential read loop of a connection. Parses the byte stream
//! into units, tracks per-stream sequence and rate, and routes each unit to
//! its stream's decoder.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::capture::{Delivery, offer};
use crate::depth::DepthCodec;
use crate::pipeline::PipelineStage;
use crate::pipeline::health::{PipelineHealth, StreamStats};
use crate::pipeline::receiver::FrameSink;
use crate::pipeline::receiver::decode_stage::ColorDecodeSession;
use crate::pipeline::receiver::depth_stage::decode_depth_unit;
use crate::pipeline::types::{CompressedUnit, StreamKind};
use crate::protocol::FramePacketCodec;

/// Bounded hand-off from the read loop to one stream's decode task.
///
/// Never waits: when the decoder falls behind the newest unit is dropped, so
/// a slow stream cannot hold back the read loop. After a dropped color unit
/// everything up to the next keyframe is skipped as well, since the decoder
/// cannot reconstruct frames that reference the lost one.
pub struct DecodeQueue {
    kind: StreamKind,
    tx: mpsc::Sender<CompressedUnit>,
    awaiting_keyframe: bool,
}

impl DecodeQueue {
    pub fn new(kind: StreamKind, tx: mpsc::Sender<CompressedUnit>) -> Self {
        Self {
            kind,
            tx,
            awaiting_keyframe: false,
        }
    }

    pub fn forward(&mut self, unit: CompressedUnit, stats: &StreamStats) -> Result<()> {
        if self.awaiting_keyframe {
            if !unit.is_keyframe {
                stats.record_frame_drop();
                return Ok(());
            }
            self.awaiting_keyframe = false;
        }

        let frame_number = unit.frame_number;
        match offer(&self.tx, unit) {
            Delivery::Accepted => Ok(()),
            Delivery::Dropped => {
                stats.record_frame_drop();
                if self.kind == StreamKind::Rgb {
                    self.awaiting_keyframe = true;
                }
                debug!(
                    "ReceiveStage: {} decoder busy, dropped frame {}",
                    self.kind, frame_number
                );
                Ok(())
            }
            Delivery::Closed => Err(anyhow::anyhow!("{} decoder stopped", self.kind)),
        }
    }
}

/// Where parsed units go
pub enum Route {
    /// Hand off to per-stream decode tasks
    PerStream {
        rgb: DecodeQueue,
        depth: DecodeQueue,
    },
    /// Decode on the read loop, in arrival order
    Inline {
        color: ColorDecodeSession,
        depth: DepthCodec,
        sink: Arc<dyn FrameSink>,
    },
}

pub struct ReceiveStage<R> {
    framed: Option<FramedRead<R, FramePacketCodec>>,
    route: Route,
    health: Arc<PipelineHealth>,
    cancel: CancellationToken,
}

impl<R> ReceiveStage<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(
        reader: R,
        codec: FramePacketCodec,
        route: Route,
        health: Arc<PipelineHealth>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            framed: Some(FramedRead::new(reader, codec)),
            route,
            health,
            cancel,
        }
    }

    /// Give up the route so per-stream decoders see end of input
    pub fn into_route(self) -> Route {
        self.route
    }

    fn dispatch(&mut self, unit: CompressedUnit) -> Result<()> {
        match &mut self.route {
            Route::PerStream { rgb, depth } => {
                let stats = self.health.stream(unit.kind);
                let queue = match unit.kind {
                    StreamKind::Rgb => rgb,
                    StreamKind::Depth => depth,
                };
                queue.forward(unit, stats)
            }
            Route::Inline { color, depth, sink } => {
                match unit.kind {
                    StreamKind::Rgb => {
                        let stats = self.health.stream(StreamKind::Rgb);
                        if let Some(frame) = color.handle(&unit, stats)? {
                            sink.on_color(frame, unit.timestamp, unit.frame_number);
                        }
                    }
                    StreamKind::Depth => {
                        let stats = self.health.stream(StreamKind::Depth);
                        if let Some(frame) = decode_depth_unit(depth, &unit, stats) {
                            sink.on_depth(frame, unit.timestamp, unit.frame_number);
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<R> PipelineStage for ReceiveStage<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn run(&mut self) -> Result<()> {
        let mut framed = self
            .framed
            .take()
            .ok_or_else(|| anyhow::anyhow!("ReceiveStage already ran"))?;

        info!("ReceiveStage: started");
        let mut total_units = 0u64;

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("ReceiveStage: cancelled");
                    break;
                }
                next = framed.next() => next,
            };

            let unit = match next {
                None => {
                    info!("ReceiveStage: peer closed the connection");
                    break;
                }
                Some(Ok(unit)) => unit,
                Some(Err(e)) => {
                    if matches!(e, crate::error::Error::Protocol(_)) {
                        self.health.record_protocol_error();
                    } else {
                        self.health.record_connection_error();
                    }
                    error!("ReceiveStage: {}", e);
                    return Err(e).context("read loop failed");
                }
            };

            total_units += 1;
            if total_units == 1 {
                info!("ReceiveStage: first unit received ({})", unit.kind);
            }

            let stats = self.health.stream(unit.kind);
            match stats.observe_sequence(unit.frame_number, unit.timestamp) {
                Ok(0) => {}
                Ok(gap) => debug!(
                    "ReceiveStage: {} gap of {} before frame {}",
                    unit.kind, gap, unit.frame_number
                ),
                Err(e) => {
                    // trusted link: drop the unit, keep the connection
                    self.health.record_protocol_error();
                    warn!("ReceiveStage: dropping unit: {}", e);
                    continue;
                }
            }
            stats.record_frame(unit.size(), unit.is_keyframe);

            self.dispatch(unit)?;
        }

        info!("ReceiveStage: finished ({} total units)", total_units);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ReceiveStage"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::pipeline::types::Timestamp;

    fn unit(frame_number: u32, is_keyframe: bool) -> CompressedUnit {
        CompressedUnit::rgb(
            Timestamp::from_secs(frame_number as f64 / 30.0),
            frame_number,
            is_keyframe,
            Bytes::from_static(b"unit"),
        )
    }

    #[test]
    fn test_full_queue_drops_until_next_keyframe() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut queue = DecodeQueue::new(StreamKind::Rgb, tx);
        let stats = StreamStats::new(StreamKind::Rgb);

        queue.forward(unit(0, true), &stats).unwrap();
        // decoder has not taken frame 0 yet
        queue.forward(unit(1, false), &stats).unwrap();
        assert_eq!(stats.dropped(), 1);

        assert_eq!(rx.try_recv().unwrap().frame_number, 0);
        // room again, but frame 2 references the lost frame 1
        queue.forward(unit(2, false), &stats).unwrap();
        assert_eq!(stats.dropped(), 2);
        assert!(rx.try_recv().is_err());

        queue.forward(unit(3, true), &stats).unwrap();
        assert_eq!(rx.try_recv().unwrap().frame_number, 3);
        assert_eq!(stats.dropped(), 2);
    }

    #[test]
    fn test_closed_queue_is_an_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut queue = DecodeQueue::new(StreamKind::Depth, tx);
        let stats = StreamStats::new(StreamKind::Depth);
        assert!(queue.forward(unit(0, true), &stats).is_err());
    }
}
