use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::cache::DeviceFeed;
use super::quality::QualityFeed;
use super::source::{DeviceSource, Subscription};
use super::types::{
    ChannelQuality, ContactQuality, DeviceReading, DeviceStatus, Matrix, BAND_COUNT,
    CHANNEL_COUNT, PSD_BINS, RAW_SAMPLES_PER_EPOCH,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;

use crate::log_info;

/// 16 samples at 256 Hz.
const EPOCH_INTERVAL: Duration = Duration::from_micros(62_500);
const SCORE_INTERVAL: Duration = Duration::from_secs(1);
const QUALITY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub epoch_interval: Duration,
    pub score_interval: Duration,
    pub quality_interval: Duration,
    pub status: DeviceStatus,
    pub contact: ContactQuality,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            epoch_interval: EPOCH_INTERVAL,
            score_interval: SCORE_INTERVAL,
            quality_interval: QUALITY_INTERVAL,
            status: DeviceStatus::online(),
            contact: ContactQuality::Good,
        }
    }
}

/// Stand-in headband that emits randomly generated readings with the same
/// shapes and rates as the hardware.
#[derive(Clone)]
pub struct SimulatedDevice {
    config: SimulatorConfig,
    status: Arc<Mutex<DeviceStatus>>,
}

fn random_matrix(rng: &mut StdRng, rows: usize, cols: usize, max: f64) -> Matrix {
    (0..rows)
        .map(|_| (0..cols).map(|_| rng.gen_range(0.0..max)).collect())
        .collect()
}

impl SimulatedDevice {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            status: Arc::new(Mutex::new(config.status)),
            config,
        }
    }

    pub fn set_status(&self, status: DeviceStatus) {
        if let Ok(mut guard) = self.status.lock() {
            *guard = status;
        }
    }
}

#[async_trait]
impl DeviceSource for SimulatedDevice {
    async fn subscribe(&self, feed: DeviceFeed) -> Result<Subscription> {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let epoch_interval = self.config.epoch_interval;
        let score_interval = self.config.score_interval;

        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut epochs = interval(epoch_interval);
            epochs.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut scores = interval(score_interval);
            scores.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = epochs.tick() => {
                        feed.push(DeviceReading::Raw(
                            random_matrix(&mut rng, CHANNEL_COUNT, RAW_SAMPLES_PER_EPOCH, 50.0),
                        ));
                        feed.push(DeviceReading::RawUnfiltered(
                            random_matrix(&mut rng, CHANNEL_COUNT, RAW_SAMPLES_PER_EPOCH, 500.0),
                        ));
                        feed.push(DeviceReading::Psd(
                            random_matrix(&mut rng, CHANNEL_COUNT, PSD_BINS, 20.0),
                        ));
                        feed.push(DeviceReading::PowerByBand(
                            random_matrix(&mut rng, BAND_COUNT, CHANNEL_COUNT, 10.0),
                        ));
                    }
                    _ = scores.tick() => {
                        feed.push(DeviceReading::Focus(rng.gen_range(0.0..1.0)));
                        feed.push(DeviceReading::Calm(rng.gen_range(0.0..1.0)));
                    }
                    _ = token.cancelled() => {
                        log_info!("simulated reading stream unsubscribed");
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(cancel_token))
    }

    async fn subscribe_signal_quality(&self, feed: QualityFeed) -> Result<Subscription> {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let contact = self.config.contact;
        let quality_interval = self.config.quality_interval;

        tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut ticker = interval(quality_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let batch = (0..CHANNEL_COUNT)
                            .map(|_| ChannelQuality {
                                status: contact,
                                standard_deviation: rng.gen_range(0.5..5.0),
                            })
                            .collect();
                        feed.push(batch);
                    }
                    _ = token.cancelled() => {
                        log_info!("simulated signal quality stream unsubscribed");
                        break;
                    }
                }
            }
        });

        Ok(Subscription::new(cancel_token))
    }

    async fn status_once(&self) -> Result<DeviceStatus> {
        self.status
            .lock()
            .map(|guard| *guard)
            .map_err(|_| anyhow!("simulator status lock poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::cache::DeviceReadingCache;
    use crate::device::quality::QualityGate;
    use crate::device::types::{DeviceState, ReadingChannel};

    fn fast_config() -> SimulatorConfig {
        SimulatorConfig {
            epoch_interval: Duration::from_millis(2),
            score_interval: Duration::from_millis(5),
            quality_interval: Duration::from_millis(5),
            ..SimulatorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_subscription_fills_every_channel() {
        let device = SimulatedDevice::new(fast_config());
        let (feed, cache) = DeviceReadingCache::new(None);
        let subscription = device.subscribe(feed).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        let snapshot = cache.snapshot().unwrap();
        assert_eq!(snapshot.psd.len(), CHANNEL_COUNT);
        assert_eq!(snapshot.psd[0].len(), PSD_BINS);
        assert_eq!(snapshot.power_by_band.len(), BAND_COUNT);
        assert!((0.0..1.0).contains(&snapshot.focus));
        assert_eq!(cache.export_vector().unwrap().len(), 808);

        subscription.unsubscribe();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let frozen = cache.version(ReadingChannel::Psd);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.version(ReadingChannel::Psd), frozen);
    }

    #[tokio::test]
    async fn test_status_follows_overrides() {
        let device = SimulatedDevice::new(SimulatorConfig::default());
        assert!(device.status_once().await.unwrap().is_online());

        device.set_status(DeviceStatus {
            state: DeviceState::Offline,
            charging: true,
        });
        let status = device.status_once().await.unwrap();
        assert_eq!(status.state, DeviceState::Offline);
        assert!(status.charging);
    }

    #[tokio::test]
    async fn test_quality_stream_opens_gate() {
        let device = SimulatedDevice::new(fast_config());
        let (feed, gate) = QualityGate::new(1);
        let gate = gate.with_poll_interval(Duration::from_millis(5));
        let _subscription = device.subscribe_signal_quality(feed).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), gate.ensure_quality(3))
            .await
            .expect("good contact should pass the gate");
    }
}
