//! Pipeline stage trait
//!
//! Defines the interface for pipeline stages and a helper to run one on its
//! own task.

use anyhow::Result;
use async_trait::async_trait;
use log::{error, info};
use tokio::task::JoinHandle;

/// Trait for pipeline stages that process media data
#[async_trait]
pub trait PipelineStage: Send {
    /// Run the stage, processing data until its input closes or it is
    /// cancelled
    async fn run(&mut self) -> Result<()>;

    /// Get the name of this stage for logging
    fn name(&self) -> &'static str;

    /// Gracefully shutdown the stage
    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Run `stage` to completion, then shut it down, logging how it ended.
pub async fn run_stage<S>(mut stage: S) -> Result<()>
where
    S: PipelineStage,
{
    let name = stage.name();
    let result = stage.run().await;
    if let Err(e) = stage.shutdown().await {
        error!("{}: shutdown failed: {:#}", name, e);
    }
    match &result {
        Ok(()) => info!("{}: stopped", name),
        Err(e) => error!("{} error: {:#}", name, e),
    }
    result
}

/// Spawn `stage` on its own task
pub fn spawn_stage<S>(stage: S) -> JoinHandle<Result<()>>
where
    S: PipelineStage + 'static,
{
    tokio::spawn(run_stage(stage))
}
