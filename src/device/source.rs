use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::cache::DeviceFeed;
use super::quality::QualityFeed;
use super::types::DeviceStatus;

/// Handle to an active push subscription. Dropping it unsubscribes.
pub struct Subscription {
    cancel_token: CancellationToken,
}

impl Subscription {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self { cancel_token }
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// The headband SDK boundary: push channels plus a one-shot status query.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// Starts delivering raw, raw-unfiltered, PSD, band-power, focus and calm
    /// readings into `feed` until the returned subscription is dropped.
    async fn subscribe(&self, feed: DeviceFeed) -> Result<Subscription>;

    /// Starts delivering signal-quality reports into `feed`.
    async fn subscribe_signal_quality(&self, feed: QualityFeed) -> Result<Subscription>;

    async fn status_once(&self) -> Result<DeviceStatus>;
}
