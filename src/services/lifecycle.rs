use async_trait::async_trait;

use crate::error::AppResult;

/// A long-running component with an explicit start and stop
#[async_trait]
pub trait RunnableService: Send {
    fn name(&self) -> &str;

    async fn start(&mut self) -> AppResult<()>;

    /// Stop and wait for in-flight work to finish
    async fn stop(&mut self) -> AppResult<()>;
}
