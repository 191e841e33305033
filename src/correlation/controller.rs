use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::loop_worker::CorrelationLoop;

pub struct CorrelationController {
    handle: Option<JoinHandle<Result<Option<String>>>>,
    cancel_token: Option<CancellationToken>,
}

impl CorrelationController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    /// Spawns the loop. Cancelling `parent` stops it as well.
    pub fn start(
        &mut self,
        correlation_loop: CorrelationLoop,
        parent: &CancellationToken,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("capture already active");
        }

        let cancel_token = parent.child_token();
        let handle = tokio::spawn(correlation_loop.run(cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Waits for the loop to end on its own (single-shot mode, an error, or
    /// someone cancelling the token).
    pub async fn wait(&mut self) -> Result<Option<String>> {
        let result = match self.handle.take() {
            Some(handle) => handle.await.context("correlation loop task failed to join")?,
            None => Ok(None),
        };
        self.cancel_token = None;
        result
    }
}

impl Default for CorrelationController {
    fn default() -> Self {
        Self::new()
    }
}

/// Dropping the controller (for example when the future awaiting `wait` is
/// abandoned) stops the loop.
impl Drop for CorrelationController {
    fn drop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            info!("Stopping correlation loop");
            token.cancel();
        }
    }
}
