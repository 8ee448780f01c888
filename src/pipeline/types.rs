//! Core types for the pipeline system

use bytes::Bytes;
use std::time::Duration;

use crate::error::{Error, ProtocolViolation};

/// Capture timestamp in seconds.
///
/// Sensor sessions stamp both streams from one monotonic clock; once a session
/// epoch is latched the same type carries session-relative seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Timestamp {
    pub secs: f64,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { secs: 0.0 };

    pub fn from_secs(secs: f64) -> Self {
        Self { secs }
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self {
            secs: duration.as_secs_f64(),
        }
    }

    /// Seconds elapsed since `epoch`, or `None` if this timestamp precedes it
    pub fn relative_to(&self, epoch: Timestamp) -> Option<Timestamp> {
        let secs = self.secs - epoch.secs;
        if secs < 0.0 {
            None
        } else {
            Some(Timestamp { secs })
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}s", self.secs)
    }
}

/// Which of the two multiplexed streams a unit belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Rgb,
    Depth,
}

impl StreamKind {
    pub const ALL: [StreamKind; 2] = [StreamKind::Rgb, StreamKind::Depth];

    /// Type byte used in the packet header
    pub fn wire_id(self) -> u8 {
        match self {
            StreamKind::Rgb => 1,
            StreamKind::Depth => 2,
        }
    }

    pub fn from_wire_id(id: u8) -> Result<Self, Error> {
        match id {
            1 => Ok(StreamKind::Rgb),
            2 => Ok(StreamKind::Depth),
            other => Err(ProtocolViolation::UnknownStreamType(other).into()),
        }
    }

    pub fn index(self) -> usize {
        match self {
            StreamKind::Rgb => 0,
            StreamKind::Depth => 1,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Rgb => write!(f, "RGB"),
            StreamKind::Depth => write!(f, "Depth"),
        }
    }
}

/// One fully encoded frame of either stream, ready for framing.
#[derive(Clone, PartialEq)]
pub struct CompressedUnit {
    pub kind: StreamKind,

    /// Session-relative presentation time
    pub timestamp: Timestamp,

    /// Strictly increasing per stream within a session
    pub frame_number: u32,

    /// Self-contained unit that can seed a decoder (RGB only)
    pub is_keyframe: bool,

    pub payload: Bytes,
}

impl CompressedUnit {
    pub fn rgb(timestamp: Timestamp, frame_number: u32, is_keyframe: bool, payload: Bytes) -> Self {
        Self {
            kind: StreamKind::Rgb,
            timestamp,
            frame_number,
            is_keyframe,
            payload,
        }
    }

    pub fn depth(timestamp: Timestamp, frame_number: u32, payload: Bytes) -> Self {
        Self {
            kind: StreamKind::Depth,
            timestamp,
            frame_number,
            is_keyframe: false,
            payload,
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

impl std::fmt::Debug for CompressedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedUnit")
            .field("kind", &self.kind)
            .field("timestamp", &self.timestamp)
            .field("frame_number", &self.frame_number)
            .field("is_keyframe", &self.is_keyframe)
            .field("size", &self.size())
            .finish()
    }
}

/// Packed pixel layouts a sensor session may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Bgra32,
    /// Single-channel 8-bit, used for depth visualization
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Bgra32 => 4,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Name understood by ffmpeg's rawvideo demuxer
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgra32 => "bgra",
            PixelFormat::Gray8 => "gray",
        }
    }
}

/// Full-resolution color raster in capture-native layout
#[derive(Clone)]
pub struct ColorFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

impl ColorFrame {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Bytes) -> Result<Self, Error> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(Error::Codec(format!(
                "color frame {}x{} {:?} needs {} bytes, got {}",
                width,
                height,
                format,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn from_rgb(image: image::RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            format: PixelFormat::Rgb24,
            data: Bytes::from(image.into_raw()),
        }
    }
}

impl std::fmt::Debug for ColorFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}
