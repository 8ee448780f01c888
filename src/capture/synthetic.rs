//! Synthetic sensor session
//!
//! Produces a moving color gradient at the configured rate and a tilted depth
//! plane with holes at a fraction of that rate, both stamped from the handle's
//! clock. Stands in for a real device in demos and tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, info};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::assets::{
    COLOR_FRAME_RATE, COLOR_HEIGHT, COLOR_WIDTH, DEPTH_FRAME_RATE, DEPTH_HEIGHT, DEPTH_WIDTH,
};
use crate::capture::{CaptureHandle, Delivery, SensorSession};
use crate::depth::{DepthFrame, DepthRange, INVALID_DEPTH};
use crate::error::{Error, Result};
use crate::pipeline::types::{ColorFrame, PixelFormat};

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub color_width: u32,
    pub color_height: u32,
    pub depth_width: u32,
    pub depth_height: u32,
    /// Color frames per second
    pub fps: u32,
    /// One depth frame every `depth_divisor` color frames
    pub depth_divisor: u32,
    pub range: DepthRange,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            color_width: COLOR_WIDTH,
            color_height: COLOR_HEIGHT,
            depth_width: DEPTH_WIDTH,
            depth_height: DEPTH_HEIGHT,
            fps: COLOR_FRAME_RATE,
            depth_divisor: (COLOR_FRAME_RATE / DEPTH_FRAME_RATE).max(1),
            range: DepthRange::default(),
        }
    }
}

pub struct SyntheticSession {
    config: SyntheticConfig,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl SyntheticSession {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            cancel: None,
            task: None,
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }
}

/// Moving BGRA gradient, capture-native layout
pub fn gradient_frame(width: u32, height: u32, tick: u64) -> ColorFrame {
    let shift = (tick * 4) as u32;
    let mut data = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let r = ((x + shift) * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            let b = (shift % 256) as u8;
            data.extend_from_slice(&[b, g, r, 255]);
        }
    }
    ColorFrame {
        width,
        height,
        format: PixelFormat::Bgra32,
        data: Bytes::from(data),
    }
}

/// Plane tilting across the range, with a sparse moving pattern of holes
pub fn depth_plane(width: u32, height: u32, range: &DepthRange, tick: u64) -> DepthFrame {
    let mut data = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            if (x as u64 + y as u64 + tick) % 17 == 0 {
                data.push(INVALID_DEPTH);
            } else {
                let t = x as f32 / width.max(1) as f32;
                data.push(range.min_depth + t * range.span());
            }
        }
    }
    DepthFrame {
        width,
        height,
        data,
    }
}

#[async_trait]
impl SensorSession for SyntheticSession {
    fn is_available(&self) -> bool {
        true
    }

    async fn start(&mut self, handle: CaptureHandle) -> Result<()> {
        if self.task.is_some() {
            return Err(Error::Configuration(
                "synthetic session already started".into(),
            ));
        }
        if self.config.fps == 0 {
            return Err(Error::Configuration("frame rate must be positive".into()));
        }

        let cancel = CancellationToken::new();
        let config = self.config.clone();
        let token = cancel.clone();
        let period = Duration::from_secs_f64(1.0 / config.fps as f64);

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let divisor = config.depth_divisor.max(1) as u64;
            let mut tick = 0u64;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let timestamp = handle.clock().now();
                let color = gradient_frame(config.color_width, config.color_height, tick);
                let mut closed = handle.deliver_color(color, timestamp) == Delivery::Closed;

                if tick % divisor == 0 {
                    let depth =
                        depth_plane(config.depth_width, config.depth_height, &config.range, tick);
                    closed &= handle.deliver_depth(depth, timestamp) == Delivery::Closed;
                }
                if closed && handle.is_closed() {
                    debug!("SyntheticSession: consumers gone");
                    break;
                }
                tick += 1;
            }
            info!("SyntheticSession: stopped after {} ticks", tick);
        }));
        self.cancel = Some(cancel);
        info!(
            "SyntheticSession: started ({}x{} color @ {} fps, {}x{} depth)",
            self.config.color_width,
            self.config.color_height,
            self.config.fps,
            self.config.depth_width,
            self.config.depth_height
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::Configuration(format!("capture task failed: {}", e)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureHandle;
    use crate::pipeline::clock::CaptureClock;

    fn small_config() -> SyntheticConfig {
        SyntheticConfig {
            color_width: 8,
            color_height: 4,
            depth_width: 4,
            depth_height: 2,
            fps: 100,
            depth_divisor: 2,
            range: DepthRange::default(),
        }
    }

    #[test]
    fn test_depth_plane_has_holes_in_range() {
        let range = DepthRange::default();
        let frame = depth_plane(34, 2, &range, 0);
        assert!(frame.valid_count() < frame.data.len());
        assert!(
            frame
                .data
                .iter()
                .filter(|d| d.is_finite())
                .all(|d| *d >= range.min_depth && *d <= range.max_depth)
        );
    }

    #[tokio::test]
    async fn test_session_delivers_both_streams() {
        let (handle, mut streams) = CaptureHandle::new(CaptureClock::new());
        let mut session = SyntheticSession::new(small_config());
        session.start(handle.clone()).await.unwrap();
        assert!(session.start(handle).await.is_err());

        let color = streams.color.recv().await.unwrap();
        let depth = streams.depth.recv().await.unwrap();
        assert_eq!((color.frame.width, color.frame.height), (8, 4));
        assert_eq!((depth.frame.width, depth.frame.height), (4, 2));
        // first tick stamps both streams from the same clock reading
        assert_eq!(color.timestamp, depth.timestamp);

        session.stop().await.unwrap();
    }
}
