//! Pipeline stage trait

use anyhow::Result;
use async_trait::async_trait;

/// A long-running stage of the streaming pipeline.
///
/// A stage runs until its input ends or the session's stop signal fires,
/// then returns. Errors returned from `run` are startup/teardown errors;
/// in-flight degradation is counted in [`SessionHealth`] instead.
///
/// [`SessionHealth`]: crate::pipeline::health::SessionHealth
#[async_trait]
pub trait PipelineStage: Send {
    async fn run(&mut self) -> Result<()>;

    fn name(&self) -> &'static str;
}
