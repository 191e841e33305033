//! Wires the headband, the streaming service and the store into one capture
//! run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::correlation::{CorrelationController, CorrelationLoop};
use crate::db::Database;
use crate::device::{DeviceReadingCache, DeviceSource, QualityGate};
use crate::metrics::StatsSnapshot;
use crate::settings::CaptureSettings;
use crate::spotify::TrackSource;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReport {
    /// Last track whose interval was finished, stored or not.
    pub last_finished: Option<String>,
    pub stats: StatsSnapshot,
}

/// Blocks until the headband reports good contact, the optional timeout
/// passes, or `cancel_token` fires. Returns false when cancelled.
pub async fn wait_for_signal_quality(
    device: &dyn DeviceSource,
    settings: &CaptureSettings,
    cancel_token: &CancellationToken,
) -> Result<bool> {
    let (feed, gate) = QualityGate::new(settings.required_passes);
    let subscription = device
        .subscribe_signal_quality(feed)
        .await
        .context("failed to subscribe to signal quality")?;

    log_info!(
        "Waiting for signal quality (at most {} bad electrodes)",
        settings.max_fails
    );
    let gate_wait = async {
        match settings.quality_timeout_secs {
            Some(secs) => tokio::time::timeout(
                Duration::from_secs(secs),
                gate.ensure_quality(settings.max_fails),
            )
            .await
            .is_ok(),
            None => {
                gate.ensure_quality(settings.max_fails).await;
                true
            }
        }
    };

    let passed = tokio::select! {
        passed = gate_wait => passed,
        _ = cancel_token.cancelled() => return Ok(false),
    };
    subscription.unsubscribe();

    if !passed {
        bail!(
            "signal quality not reached within {}s",
            settings.quality_timeout_secs.unwrap_or_default()
        );
    }
    log_info!("Signal quality is good, starting capture");
    Ok(true)
}

/// Runs one capture: subscribe to the headband, wait for signal quality,
/// then correlate until the loop ends or `cancel_token` fires.
pub async fn run_capture(
    db: Database,
    device: Arc<dyn DeviceSource>,
    tracks: Arc<dyn TrackSource>,
    settings: &CaptureSettings,
    cancel_token: CancellationToken,
) -> Result<CaptureReport> {
    let (feed, cache) = DeviceReadingCache::new(settings.max_reading_age());
    let _subscription = device
        .subscribe(feed)
        .await
        .context("failed to subscribe to headband readings")?;

    if !wait_for_signal_quality(device.as_ref(), settings, &cancel_token).await? {
        log_info!("Capture cancelled before signal quality was reached");
        return Ok(CaptureReport {
            last_finished: None,
            stats: StatsSnapshot::default(),
        });
    }

    let listener = match tracks.current_user().await {
        Ok(listener) => listener,
        Err(err) => {
            log_warn!("Could not look up the listener, storing rows without one: {err}");
            None
        }
    };

    let correlation_loop =
        CorrelationLoop::new(db, tracks, device, cache, settings.loop_config()).with_listener(listener);
    let stats = correlation_loop.stats();

    let mut controller = CorrelationController::new();
    controller.start(correlation_loop, &cancel_token)?;
    let last_finished = controller.wait().await?;

    let stats = stats.get_snapshot().await;
    log_info!(
        "Capture finished: {} ticks, {} summaries stored, {} dropped",
        stats.tick_count,
        stats.summaries_stored,
        stats.summaries_dropped()
    );
    Ok(CaptureReport {
        last_finished,
        stats,
    })
}
