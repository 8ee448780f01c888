//! ffmpeg-backed media writer
//!
//! Raw frames are piped into an `ffmpeg` child process that encodes them at a
//! constant frame rate. Sensor frames arrive at irregular times, so each frame
//! is placed on the constant-rate timeline by its timestamp: gaps repeat the
//! previous frame (black before the first) and frames that land on an
//! already written slot are skipped. A gap longer than `MAX_FILL_SECS` is
//! cut short: the timeline jumps ahead instead of repeating frames for it.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

use crate::assets::MAX_FILL_SECS;
use crate::error::{Error, Result};
use crate::pipeline::types::{PixelFormat, StreamKind, Timestamp};
use crate::recording::{MediaWriter, RawFrame, RecordingTarget, WriterFactory};

/// How a frame lands on the constant-rate timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotPlan {
    /// The slot is already written
    Skip,
    /// Repeat the previous frame `repeats` times, then write this one into
    /// `slot`
    Write { slot: u64, repeats: u64 },
}

pub(crate) fn plan_slot(next_slot: u64, timestamp: Timestamp, frame_rate: u32) -> SlotPlan {
    let slot = (timestamp.secs.max(0.0) * frame_rate as f64).round() as u64;
    if slot < next_slot {
        SlotPlan::Skip
    } else {
        SlotPlan::Write {
            slot,
            repeats: (slot - next_slot).min(MAX_FILL_SECS * frame_rate as u64),
        }
    }
}

struct Geometry {
    width: u32,
    height: u32,
    format: PixelFormat,
}

pub struct FfmpegWriter {
    path: PathBuf,
    program: String,
    frame_rate: u32,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    geometry: Option<Geometry>,
    last_frame: Vec<u8>,
    next_slot: u64,
    frames_written: u64,
    skipped: u64,
}

impl FfmpegWriter {
    pub fn new(path: PathBuf, frame_rate: u32) -> Self {
        Self {
            path,
            program: "ffmpeg".to_string(),
            frame_rate: frame_rate.max(1),
            child: None,
            stdin: None,
            geometry: None,
            last_frame: Vec::new(),
            next_slot: 0,
            frames_written: 0,
            skipped: 0,
        }
    }

    /// Use another ffmpeg binary
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Spawn the encoder process for the geometry of the first frame
    fn spawn(&mut self, frame: &RawFrame<'_>) -> Result<()> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y"])
            .args(["-f", "rawvideo", "-pix_fmt", frame.format.ffmpeg_name()])
            .args(["-s", &format!("{}x{}", frame.width, frame.height)])
            .args(["-r", &self.frame_rate.to_string()])
            .args(["-i", "pipe:0"])
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .arg(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|e| {
            Error::Recording(format!("failed to spawn {} for {}: {}", self.program, self.path.display(), e))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Recording("ffmpeg stdin not available".into()))?;

        info!(
            "FfmpegWriter: writing {} ({}x{} {} @ {} fps)",
            self.path.display(),
            frame.width,
            frame.height,
            frame.format.ffmpeg_name(),
            self.frame_rate
        );
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.geometry = Some(Geometry {
            width: frame.width,
            height: frame.height,
            format: frame.format,
        });
        // black until the first real frame
        self.last_frame = vec![0; frame.data.len()];
        Ok(())
    }

    async fn write_raw(stdin: &mut ChildStdin, data: &[u8]) -> Result<()> {
        stdin
            .write_all(data)
            .await
            .map_err(|e| Error::Recording(format!("ffmpeg pipe closed: {}", e)))
    }
}

#[async_trait]
impl MediaWriter for FfmpegWriter {
    async fn append(&mut self, frame: RawFrame<'_>, timestamp: Timestamp) -> Result<()> {
        let expected = frame.width as usize * frame.height as usize * frame.format.bytes_per_pixel();
        if frame.data.len() != expected {
            return Err(Error::Recording(format!(
                "frame of {} bytes does not match {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }

        let changed = match &self.geometry {
            None => None,
            Some(g) => Some(g.width != frame.width || g.height != frame.height || g.format != frame.format),
        };
        match changed {
            None => self.spawn(&frame)?,
            Some(true) => {
                return Err(Error::Recording(format!(
                    "frame geometry changed to {}x{} {:?}",
                    frame.width, frame.height, frame.format
                )));
            }
            Some(false) => {}
        }

        let (slot, repeats) = match plan_slot(self.next_slot, timestamp, self.frame_rate) {
            SlotPlan::Skip => {
                self.skipped += 1;
                debug!("FfmpegWriter: slot at {} already written", timestamp);
                return Ok(());
            }
            SlotPlan::Write { slot, repeats } => (slot, repeats),
        };
        let gap = slot - self.next_slot;
        if gap > repeats {
            warn!(
                "FfmpegWriter: {} jumps {} slots ahead, filling only {}",
                timestamp, gap, repeats
            );
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Recording("writer already finalized".into()))?;
        for _ in 0..repeats {
            Self::write_raw(stdin, &self.last_frame).await?;
        }
        Self::write_raw(stdin, frame.data).await?;

        self.last_frame.copy_from_slice(frame.data);
        self.frames_written += repeats + 1;
        self.next_slot = slot + 1;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<Option<PathBuf>> {
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };
        if let Some(mut stdin) = self.stdin.take() {
            // ffmpeg finishes the file once its input hits EOF
            if let Err(e) = stdin.shutdown().await {
                warn!("FfmpegWriter: closing pipe failed: {}", e);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::Recording(format!("waiting for ffmpeg failed: {}", e)))?;
        if !status.success() {
            return Err(Error::Recording(format!(
                "ffmpeg exited with {} for {}",
                status,
                self.path.display()
            )));
        }

        info!(
            "FfmpegWriter: finalized {} ({} frames, {} skipped)",
            self.path.display(),
            self.frames_written,
            self.skipped
        );
        Ok(Some(self.path.clone()))
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if let Some(child) = &mut self.child {
            let _ = child.start_kill();
        }
    }
}

/// Creates one `FfmpegWriter` per stream, as `<stem>-{color,depth}.mp4`
#[derive(Debug, Clone)]
pub struct FfmpegWriterFactory {
    program: String,
}

impl FfmpegWriterFactory {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegWriterFactory {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl WriterFactory for FfmpegWriterFactory {
    fn create(&self, kind: StreamKind, target: &RecordingTarget) -> Result<Box<dyn MediaWriter>> {
        std::fs::create_dir_all(&target.dir).map_err(|e| {
            Error::Recording(format!("cannot create {}: {}", target.dir.display(), e))
        })?;
        let writer = FfmpegWriter::new(target.path_for(kind, "mp4"), target.frame_rate)
            .with_program(self.program.clone());
        Ok(Box::new(writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_plan() {
        // first frame at the epoch
        assert_eq!(
            plan_slot(0, Timestamp::ZERO, 30),
            SlotPlan::Write { slot: 0, repeats: 0 }
        );
        // 100 ms late at 30 fps: three slots to fill
        assert_eq!(
            plan_slot(0, Timestamp::from_secs(0.1), 30),
            SlotPlan::Write { slot: 3, repeats: 3 }
        );
        assert_eq!(
            plan_slot(4, Timestamp::from_secs(4.0 / 30.0), 30),
            SlotPlan::Write { slot: 4, repeats: 0 }
        );
        // lands on a slot already covered
        assert_eq!(plan_slot(5, Timestamp::from_secs(0.1), 30), SlotPlan::Skip);
    }

    #[test]
    fn test_far_future_timestamp_fill_is_bounded() {
        let cap = MAX_FILL_SECS * 30;
        assert_eq!(
            plan_slot(1, Timestamp::from_secs(1.0e6), 30),
            SlotPlan::Write {
                slot: 30_000_000,
                repeats: cap
            }
        );
        // once past the jump, the timeline continues from the new slot
        assert_eq!(
            plan_slot(30_000_001, Timestamp::from_secs(1.0e6 + 2.0 / 30.0), 30),
            SlotPlan::Write {
                slot: 30_000_002,
                repeats: 1
            }
        );
    }

    #[tokio::test]
    async fn test_finalize_without_frames_writes_nothing() {
        let mut writer = FfmpegWriter::new(PathBuf::from("unused.mp4"), 30);
        assert_eq!(writer.finalize().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_encoder_is_a_recording_error() {
        let mut writer = FfmpegWriter::new(PathBuf::from("unused.mp4"), 30)
            .with_program("depthcast-no-such-ffmpeg");
        let data = [0u8; 4];
        let frame = RawFrame {
            width: 2,
            height: 2,
            format: PixelFormat::Gray8,
            data: &data,
        };
        let err = writer.append(frame, Timestamp::ZERO).await.unwrap_err();
        assert!(matches!(err, Error::Recording(_)));
    }

    #[tokio::test]
    async fn test_rejects_mismatched_buffer() {
        let mut writer = FfmpegWriter::new(PathBuf::from("unused.mp4"), 30);
        let data = [0u8; 3];
        let frame = RawFrame {
            width: 2,
            height: 2,
            format: PixelFormat::Gray8,
            data: &data,
        };
        assert!(writer.append(frame, Timestamp::ZERO).await.is_err());
    }
}
