//! Local recording
//!
//! Two independently playable files per session, one for color and one for
//! the depth visualization, both timed against the same session epoch.

pub mod ffmpeg;
pub mod synchronizer;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::types::{PixelFormat, StreamKind, Timestamp};

pub use ffmpeg::{FfmpegWriter, FfmpegWriterFactory};
pub use synchronizer::{Synchronizer, WriteOutcome};

/// A borrowed raster handed to a writer
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

/// Where and how one recording session is written
#[derive(Debug, Clone)]
pub struct RecordingTarget {
    pub dir: PathBuf,
    /// Shared file name prefix of both outputs
    pub stem: String,
    pub frame_rate: u32,
}

impl RecordingTarget {
    /// `capture-<local time>` under `dir`
    pub fn timestamped(dir: impl Into<PathBuf>, frame_rate: u32) -> Self {
        Self {
            dir: dir.into(),
            stem: format!("capture-{}", chrono::Local::now().format("%Y%m%d-%H%M%S")),
            frame_rate,
        }
    }

    pub fn path_for(&self, kind: StreamKind, extension: &str) -> PathBuf {
        let suffix = match kind {
            StreamKind::Rgb => "color",
            StreamKind::Depth => "depth",
        };
        self.dir
            .join(format!("{}-{}.{}", self.stem, suffix, extension))
    }
}

/// One output file. Frames carry session-relative timestamps.
#[async_trait]
pub trait MediaWriter: Send {
    async fn append(&mut self, frame: RawFrame<'_>, timestamp: Timestamp) -> Result<()>;

    /// Flush and close the file. `Ok(None)` when nothing was ever written.
    async fn finalize(&mut self) -> Result<Option<PathBuf>>;
}

pub trait WriterFactory: Send + Sync {
    fn create(&self, kind: StreamKind, target: &RecordingTarget) -> Result<Box<dyn MediaWriter>>;
}
