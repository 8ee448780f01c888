//! Capture stage for the sender pipeline
//!
//! Wraps a sensor session and exposes its frames as per-stream single-slot
//! queues for the encode stages.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;

use crate::capture::{CaptureHandle, CaptureStreams, SensorSession};
use crate::pipeline::clock::CaptureClock;
use crate::pipeline::health::PipelineHealth;

/// Capture stage: owns the sensor session
///
/// Driven externally via start_capture/stop_capture; the session runs its own
/// delivery loop.
pub struct CaptureStage {
    session: Box<dyn SensorSession>,
    clock: CaptureClock,
    health: Arc<PipelineHealth>,
    is_running: bool,
}

impl CaptureStage {
    pub fn new(session: Box<dyn SensorSession>, clock: CaptureClock, health: Arc<PipelineHealth>) -> Self {
        Self {
            session,
            clock,
            health,
            is_running: false,
        }
    }

    /// Start the session and return the receiving ends of both streams
    pub async fn start_capture(&mut self) -> Result<CaptureStreams> {
        if !self.session.is_available() {
            anyhow::bail!("sensor session is not available");
        }
        let (handle, streams) = CaptureHandle::new(self.clock.clone());
        self.session
            .start(handle.with_health(self.health.clone()))
            .await
            .context("failed to start sensor session")?;
        self.is_running = true;
        info!("CaptureStage: started capture");
        Ok(streams)
    }

    /// Stop the session; its queues close once it lets go of the handle
    pub async fn stop_capture(&mut self) -> Result<()> {
        if self.is_running {
            self.session
                .stop()
                .await
                .context("failed to stop sensor session")?;
            self.is_running = false;
            info!("CaptureStage: stopped capture");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }
}
