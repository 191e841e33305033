use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::db::{Database, Listener, TrackRecord};
use crate::device::{DeviceReadingCache, DeviceSource};
use crate::eeg::{AccumulatorError, SongEegAccumulator};
use crate::metrics::{CaptureStats, IntervalMetrics, IntervalOutcome};
use crate::spotify::{SpotifyError, TrackSource};

use super::state::{CorrelationState, IntervalHealth};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoopMode {
    /// Stop after the first track change.
    SingleShot,
    /// Keep capturing until cancelled.
    #[default]
    Continuous,
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub tick_interval: Duration,
    pub psd_bins: usize,
    pub mode: LoopMode,
    pub max_api_failures: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(250),
            psd_bins: crate::eeg::DEFAULT_PSD_BINS,
            mode: LoopMode::Continuous,
            max_api_failures: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Same track (or a failed poll); still accumulating.
    Unchanged,
    /// The active track ended. Carries the id of the track that finished,
    /// `None` when nothing was playing.
    TrackChanged { finished: Option<String> },
}

/// Ties the headband, the streaming service and the store together.
pub struct CorrelationLoop {
    db: Database,
    tracks: Arc<dyn TrackSource>,
    device: Arc<dyn DeviceSource>,
    cache: DeviceReadingCache,
    accumulator: SongEegAccumulator,
    listener: Option<Listener>,
    config: LoopConfig,
    stats: CaptureStats,
    state: CorrelationState,
}

impl CorrelationLoop {
    pub fn new(
        db: Database,
        tracks: Arc<dyn TrackSource>,
        device: Arc<dyn DeviceSource>,
        cache: DeviceReadingCache,
        config: LoopConfig,
    ) -> Self {
        Self {
            db,
            tracks,
            device,
            cache,
            accumulator: SongEegAccumulator::new(config.psd_bins),
            listener: None,
            config,
            stats: CaptureStats::new(),
            state: CorrelationState::default(),
        }
    }

    /// Listener recorded next to every row written by this loop.
    pub fn with_listener(mut self, listener: Option<Listener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats.clone()
    }

    pub fn active_track(&self) -> Option<&TrackRecord> {
        self.state.active.as_ref()
    }

    pub fn pending_ticks(&self) -> usize {
        self.accumulator.tick_count()
    }

    /// Reads the current track, makes it active and stores its metadata.
    pub async fn begin(&mut self) -> Result<()> {
        let current = self.poll_track().await?.flatten();
        self.activate(current).await
    }

    /// One polling tick: fold device status, gather EEG, then check whether
    /// the song changed.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        self.stats.record_tick().await;
        self.observe_device().await;

        if let Err(err) = self.accumulator.gather_tick(&self.cache) {
            log_warn!("Skipping EEG sample this tick: {err}");
            self.stats.record_skipped_sample().await;
        }

        let Some(current) = self.poll_track().await? else {
            return Ok(TickOutcome::Unchanged);
        };
        if !self.state.is_change(current.as_ref()) {
            return Ok(TickOutcome::Unchanged);
        }

        let finished = self.finish_interval().await?;
        self.activate(current).await?;
        Ok(TickOutcome::TrackChanged { finished })
    }

    /// Runs until cancelled, or until the first track change in
    /// single-shot mode. Returns the id of the last finished track.
    pub async fn run(mut self, cancel_token: CancellationToken) -> Result<Option<String>> {
        self.begin().await?;

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so every gathered
        // sample is one interval apart from `begin`.
        ticker.tick().await;

        let mut last_finished = None;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = match self.tick().await {
                        Ok(outcome) => outcome,
                        Err(err) => {
                            log_error!("correlation loop failed: {err:?}");
                            return Err(err);
                        }
                    };
                    if let TickOutcome::TrackChanged { finished } = outcome {
                        if self.config.mode == LoopMode::SingleShot {
                            log_info!("Single-shot capture finished");
                            return Ok(finished);
                        }
                        last_finished = finished;
                    }
                }
                _ = cancel_token.cancelled() => {
                    log_info!(
                        "correlation loop shutting down, discarding {} pending ticks",
                        self.accumulator.tick_count()
                    );
                    break;
                }
            }
        }

        Ok(last_finished)
    }

    async fn observe_device(&mut self) {
        match self.device.status_once().await {
            Ok(status) => self.state.health.observe(&status),
            Err(err) => {
                log_warn!("Device status query failed: {err:?}");
                self.state.health.observe_unknown();
            }
        }
    }

    /// `Ok(None)` means no answer this tick (a tolerated failure or a
    /// rate-limit pause); the caller keeps the current interval going.
    async fn poll_track(&mut self) -> Result<Option<Option<TrackRecord>>> {
        if let Some(until) = self.state.rate_limited_until {
            if Instant::now() < until {
                return Ok(None);
            }
            self.state.rate_limited_until = None;
        }

        match self.tracks.current_track().await {
            Ok(track) => {
                self.state.consecutive_api_failures = 0;
                Ok(Some(track))
            }
            Err(SpotifyError::RateLimited { retry_after_secs }) => {
                log_warn!("Streaming API rate limited, pausing polls for {retry_after_secs}s");
                self.stats.record_rate_limit().await;
                self.state.rate_limited_until =
                    Some(Instant::now() + Duration::from_secs(retry_after_secs));
                Ok(None)
            }
            Err(err) => {
                self.stats.record_api_failure().await;
                self.state.consecutive_api_failures += 1;
                let failures = self.state.consecutive_api_failures;
                if failures >= self.config.max_api_failures {
                    bail!("streaming API failed {failures} times in a row: {err}");
                }
                log_warn!(
                    "Streaming API call failed ({failures}/{}): {err}",
                    self.config.max_api_failures
                );
                Ok(None)
            }
        }
    }

    /// Finalizes the active interval, stores it when the device stayed
    /// healthy, and clears it for the next track.
    async fn finish_interval(&mut self) -> Result<Option<String>> {
        let finished = self.state.active.as_ref().map(|t| t.id.clone());
        let tick_count = self.accumulator.tick_count();

        let outcome = match self.accumulator.finalize() {
            Ok(summary) => match self.state.health.verdict(finished.as_deref()) {
                Ok(track_id) => {
                    let summary_id = self
                        .db
                        .insert_eeg_summary(track_id, &summary, self.listener.as_ref())
                        .await
                        .context("failed to persist EEG summary")?;
                    log_info!(
                        "Stored EEG summary {summary_id} for track {track_id} ({tick_count} ticks)"
                    );
                    IntervalOutcome::Stored { summary_id }
                }
                Err(reason) => {
                    let health = self.state.health;
                    log_warn!(
                        "Dropping EEG summary ({tick_count} ticks, {} offline and {} charging of {} observed): {reason}",
                        health.offline_ticks,
                        health.charging_ticks,
                        health.observed_ticks
                    );
                    self.stats.record_drop(reason).await;
                    IntervalOutcome::Dropped {
                        reason: reason.to_string(),
                    }
                }
            },
            Err(AccumulatorError::Empty) => {
                log_info!("No EEG samples gathered for the finished interval");
                IntervalOutcome::Empty
            }
            Err(err) => return Err(err).context("failed to finalize EEG summary"),
        };

        self.stats
            .record_interval(IntervalMetrics {
                finished_at: Utc::now(),
                track_id: finished.clone(),
                tick_count,
                outcome,
            })
            .await;

        self.accumulator.reset();
        self.state.health = IntervalHealth::default();
        Ok(finished)
    }

    async fn activate(&mut self, current: Option<TrackRecord>) -> Result<()> {
        match &current {
            Some(track) => {
                self.db
                    .upsert_track(track, self.listener.as_ref())
                    .await
                    .with_context(|| format!("failed to persist track {}", track.id))?;
                log_info!("Now playing: {} by {}", track.name, track.artist_line());
            }
            None => log_info!("Nothing is playing"),
        }
        self.state.active = current;
        Ok(())
    }
}
