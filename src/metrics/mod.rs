mod types;

pub use types::{IntervalMetrics, IntervalOutcome, StatsSnapshot};

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::correlation::DropReason;

const MAX_RECENT_INTERVALS: usize = 20;

/// Counters for one capture run, shared between the loop and whoever
/// reports on it.
pub struct CaptureStats {
    inner: Arc<Mutex<StatsSnapshot>>,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatsSnapshot::default())),
        }
    }

    pub async fn record_tick(&self) {
        self.inner.lock().await.tick_count += 1;
    }

    pub async fn record_skipped_sample(&self) {
        self.inner.lock().await.skipped_samples += 1;
    }

    pub async fn record_api_failure(&self) {
        self.inner.lock().await.api_failures += 1;
    }

    pub async fn record_rate_limit(&self) {
        self.inner.lock().await.rate_limits += 1;
    }

    pub async fn record_interval(&self, interval: IntervalMetrics) {
        let mut state = self.inner.lock().await;

        state.track_changes += 1;
        match &interval.outcome {
            IntervalOutcome::Stored { .. } => state.summaries_stored += 1,
            IntervalOutcome::Dropped { .. } | IntervalOutcome::Empty => {}
        }

        state.recent_intervals.push(interval);
        if state.recent_intervals.len() > MAX_RECENT_INTERVALS {
            state.recent_intervals.remove(0);
        }
    }

    pub async fn record_drop(&self, reason: DropReason) {
        let mut state = self.inner.lock().await;
        match reason {
            DropReason::DeviceOffline => state.dropped_offline += 1,
            DropReason::NoActiveTrack => state.dropped_no_track += 1,
            DropReason::DeviceCharging => state.dropped_charging += 1,
        }
    }

    pub async fn get_snapshot(&self) -> StatsSnapshot {
        self.inner.lock().await.clone()
    }
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for CaptureStats {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
