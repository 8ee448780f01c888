//! Health monitoring and per-stream statistics

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use log::info;
use tokio_util::sync::CancellationToken;

use crate::assets::FPS_WINDOW_MS;
use crate::error::{ProtocolViolation, Result};

use super::types::{StreamKind, Timestamp};

/// Arrival slots kept for the rolling rate; bounds the measurable rate at
/// `FPS_RING_SIZE / window`.
const FPS_RING_SIZE: usize = 256;
const NO_FRAME: u64 = u64::MAX;

/// Statistics of one stream
///
/// All fields use atomic operations, so the read loop never waits on a
/// reporter and vice versa. Sequence fields are written by a single task
/// (the connection's read loop).
pub struct StreamStats {
    kind: StreamKind,
    base: Instant,
    window: Duration,

    frames: AtomicU64,
    bytes: AtomicU64,
    keyframes: AtomicU64,

    /// Last frame number observed, `NO_FRAME` before the first one
    last_frame_number: AtomicU64,
    /// Bits of the last accepted timestamp, `NO_FRAME` before the first one
    last_timestamp: AtomicU64,

    /// Sum of frame-number gaps
    dropped: AtomicU64,

    decode_failures: AtomicU64,
    sequence_violations: AtomicU64,

    /// Arrival times (micros since `base`) in a fixed ring
    arrivals: Box<[AtomicU64]>,
    cursor: AtomicUsize,
}

impl StreamStats {
    pub fn new(kind: StreamKind) -> Self {
        Self::with_window(kind, Duration::from_millis(FPS_WINDOW_MS))
    }

    pub fn with_window(kind: StreamKind, window: Duration) -> Self {
        Self {
            kind,
            base: Instant::now(),
            window,
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            keyframes: AtomicU64::new(0),
            last_frame_number: AtomicU64::new(NO_FRAME),
            last_timestamp: AtomicU64::new(NO_FRAME),
            dropped: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            sequence_violations: AtomicU64::new(0),
            arrivals: (0..FPS_RING_SIZE).map(|_| AtomicU64::new(NO_FRAME)).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Check a unit's frame number and timestamp against the last ones seen.
    ///
    /// Returns the size of the frame-number gap (0 when contiguous) and adds
    /// it to the dropped counter. A repeated or decreasing frame number, or a
    /// timestamp earlier than the previous one, is a protocol violation: it
    /// is counted and the last seen values are left unchanged.
    pub fn observe_sequence(&self, frame_number: u32, timestamp: Timestamp) -> Result<u64> {
        let last = self.last_frame_number.load(Ordering::Relaxed);
        let last_ts = self.last_timestamp.load(Ordering::Relaxed);

        if last != NO_FRAME && (frame_number as u64) <= last {
            self.sequence_violations.fetch_add(1, Ordering::Relaxed);
            return Err(ProtocolViolation::FrameNumberRegression {
                kind: self.kind,
                last: last as u32,
                got: frame_number,
            }
            .into());
        }
        if last_ts != NO_FRAME {
            let previous = f64::from_bits(last_ts);
            if timestamp.secs < previous {
                self.sequence_violations.fetch_add(1, Ordering::Relaxed);
                return Err(ProtocolViolation::TimestampRegression {
                    kind: self.kind,
                    last: previous,
                    got: timestamp.secs,
                }
                .into());
            }
        }

        let gap = if last == NO_FRAME {
            0
        } else {
            frame_number as u64 - last - 1
        };
        if gap > 0 {
            self.dropped.fetch_add(gap, Ordering::Relaxed);
        }
        self.last_frame_number
            .store(frame_number as u64, Ordering::Relaxed);
        self.last_timestamp
            .store(timestamp.secs.to_bits(), Ordering::Relaxed);
        Ok(gap)
    }

    /// Record an accepted unit
    pub fn record_frame(&self, size: usize, is_keyframe: bool) {
        self.record_frame_at(size, is_keyframe, Instant::now());
    }

    pub fn record_frame_at(&self, size: usize, is_keyframe: bool, at: Instant) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size as u64, Ordering::Relaxed);
        if is_keyframe {
            self.keyframes.fetch_add(1, Ordering::Relaxed);
        }
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % FPS_RING_SIZE;
        let micros = at.saturating_duration_since(self.base).as_micros() as u64;
        self.arrivals[slot].store(micros, Ordering::Relaxed);
    }

    /// Record a frame lost before transmission or decode (full queue, encode
    /// failure)
    pub fn record_frame_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn keyframes(&self) -> u64 {
        self.keyframes.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn sequence_violations(&self) -> u64 {
        self.sequence_violations.load(Ordering::Relaxed)
    }

    pub fn last_frame_number(&self) -> Option<u32> {
        match self.last_frame_number.load(Ordering::Relaxed) {
            NO_FRAME => None,
            n => Some(n as u32),
        }
    }

    /// Frames per second over the sliding window ending now
    pub fn fps(&self) -> f64 {
        self.fps_at(Instant::now())
    }

    pub fn fps_at(&self, now: Instant) -> f64 {
        let now = now.saturating_duration_since(self.base).as_micros() as u64;
        let window = self.window.as_micros() as u64;
        if window == 0 {
            return 0.0;
        }
        let recent = self
            .arrivals
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .filter(|t| *t != NO_FRAME && *t <= now && now - *t < window)
            .count();
        recent as f64 * 1_000_000.0 / window as f64
    }

    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            kind: self.kind,
            frames: self.frames(),
            bytes: self.bytes(),
            keyframes: self.keyframes(),
            dropped: self.dropped(),
            decode_failures: self.decode_failures(),
            sequence_violations: self.sequence_violations(),
            fps: self.fps(),
        }
    }
}

/// Health metrics for one pipeline: both streams plus connection counters
pub struct PipelineHealth {
    streams: [StreamStats; 2],

    pub connections: AtomicU64,
    pub connection_errors: AtomicU64,
    pub protocol_errors: AtomicU64,
}

impl PipelineHealth {
    pub fn new() -> Self {
        Self::with_fps_window(Duration::from_millis(FPS_WINDOW_MS))
    }

    pub fn with_fps_window(window: Duration) -> Self {
        Self {
            streams: [
                StreamStats::with_window(StreamKind::Rgb, window),
                StreamStats::with_window(StreamKind::Depth, window),
            ],
            connections: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
        }
    }

    pub fn stream(&self, kind: StreamKind) -> &StreamStats {
        &self.streams[kind.index()]
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            rgb: self.stream(StreamKind::Rgb).summary(),
            depth: self.stream(StreamKind::Depth).summary(),
            connections: self.connections.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of one stream
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub kind: StreamKind,
    pub frames: u64,
    pub bytes: u64,
    pub keyframes: u64,
    pub dropped: u64,
    pub decode_failures: u64,
    pub sequence_violations: u64,
    pub fps: f64,
}

impl std::fmt::Display for StreamSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} frames ({:.1} fps, {} dropped), {} bytes, {} keyframes, {} decode failures, {} sequence violations",
            self.kind,
            self.frames,
            self.fps,
            self.dropped,
            self.bytes,
            self.keyframes,
            self.decode_failures,
            self.sequence_violations
        )
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub rgb: StreamSummary,
    pub depth: StreamSummary,
    pub connections: u64,
    pub connection_errors: u64,
    pub protocol_errors: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {} | {} connections, {} connection errors, {} protocol errors",
            self.rgb, self.depth, self.connections, self.connection_errors, self.protocol_errors
        )
    }
}

/// Periodically logs a health summary until cancelled
pub struct HealthReporter {
    label: &'static str,
    health: Arc<PipelineHealth>,
    interval: Duration,
}

impl HealthReporter {
    pub fn new(label: &'static str, health: Arc<PipelineHealth>, interval: Duration) -> Self {
        Self {
            label,
            health,
            interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        // first tick completes immediately
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    info!("{} pipeline: {}", self.label, self.health.summary());
                }
            }
        }
        info!("{} pipeline final: {}", self.label, self.health.summary());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn ts(frame_number: u32) -> Timestamp {
        Timestamp::from_secs(frame_number as f64 / 30.0)
    }

    #[test]
    fn test_stream_counters() {
        let stats = StreamStats::new(StreamKind::Rgb);
        stats.record_frame(1000, true);
        stats.record_frame(2000, false);
        stats.record_frame(1500, false);

        assert_eq!(stats.frames(), 3);
        assert_eq!(stats.bytes(), 4500);
        assert_eq!(stats.keyframes(), 1);
        assert_eq!(stats.dropped(), 0);
    }

    #[test]
    fn test_gap_adds_exact_size() {
        let stats = StreamStats::new(StreamKind::Depth);
        assert_eq!(stats.observe_sequence(0, ts(0)).unwrap(), 0);
        assert_eq!(stats.observe_sequence(1, ts(1)).unwrap(), 0);
        assert_eq!(stats.observe_sequence(5, ts(5)).unwrap(), 3);
        assert_eq!(stats.dropped(), 3);
        assert_eq!(stats.observe_sequence(6, ts(6)).unwrap(), 0);
        assert_eq!(stats.observe_sequence(16, ts(16)).unwrap(), 9);
        assert_eq!(stats.dropped(), 12);
        assert_eq!(stats.last_frame_number(), Some(16));
    }

    #[test]
    fn test_first_frame_number_is_not_a_gap() {
        let stats = StreamStats::new(StreamKind::Rgb);
        assert_eq!(stats.observe_sequence(40, ts(40)).unwrap(), 0);
        assert_eq!(stats.dropped(), 0);
    }

    #[test]
    fn test_regression_is_violation() {
        let stats = StreamStats::new(StreamKind::Rgb);
        stats.observe_sequence(7, ts(7)).unwrap();
        let err = stats.observe_sequence(7, ts(7)).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolViolation::FrameNumberRegression { last: 7, got: 7, .. })
        ));
        assert!(stats.observe_sequence(3, ts(3)).is_err());
        assert_eq!(stats.sequence_violations(), 2);
        assert_eq!(stats.last_frame_number(), Some(7));
        assert_eq!(stats.observe_sequence(8, ts(8)).unwrap(), 0);
        assert_eq!(stats.dropped(), 0);
    }

    #[test]
    fn test_timestamp_regression_is_violation() {
        let stats = StreamStats::new(StreamKind::Rgb);
        stats.observe_sequence(0, Timestamp::from_secs(5.0)).unwrap();
        let err = stats
            .observe_sequence(1, Timestamp::from_secs(1.0))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolViolation::TimestampRegression { .. })
        ));
        assert!(!err.is_fatal_for_connection());
        assert_eq!(stats.sequence_violations(), 1);
        assert_eq!(stats.last_frame_number(), Some(0));

        // equal timestamps are allowed; the rejected number is free again
        assert_eq!(stats.observe_sequence(1, Timestamp::from_secs(5.0)).unwrap(), 0);
        assert_eq!(stats.dropped(), 0);
    }

    #[test]
    fn test_rolling_fps() {
        let stats = StreamStats::with_window(StreamKind::Rgb, Duration::from_secs(1));
        let start = Instant::now();
        for i in 0..30 {
            stats.record_frame_at(10, false, start + Duration::from_millis(i * 33));
        }
        let fps = stats.fps_at(start + Duration::from_millis(990));
        assert!((fps - 30.0).abs() < 0.01, "fps {}", fps);

        // all arrivals fall out of the window
        let later = stats.fps_at(start + Duration::from_secs(5));
        assert_eq!(later, 0.0);
    }

    #[test]
    fn test_health_summary_display() {
        let health = PipelineHealth::new();
        health.stream(StreamKind::Depth).record_frame(64, false);
        health.record_connection();
        let summary = health.summary();
        assert_eq!(summary.depth.frames, 1);
        assert_eq!(summary.connections, 1);
        let text = summary.to_string();
        assert!(text.contains("RGB: 0 frames"));
        assert!(text.contains("Depth: 1 frames"));
    }
}
