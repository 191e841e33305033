//! Latest-value cache for headband readings.
//!
//! Each push channel gets its own `watch` slot: producers overwrite, the
//! correlation loop reads whatever is newest. Every write bumps a per-channel
//! version and records the arrival instant so readers can reject stale data.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;

use super::types::{
    DeviceReading, Matrix, ReadingChannel, BAND_COUNT, CHANNEL_COUNT, PSD_BINS,
    RAW_SAMPLES_PER_EPOCH,
};

/// Length of the flattened vector produced by [`DeviceReadingCache::export_vector`].
pub const EXPORT_VECTOR_LEN: usize = 2 * CHANNEL_COUNT * RAW_SAMPLES_PER_EPOCH
    + CHANNEL_COUNT * PSD_BINS
    + BAND_COUNT * CHANNEL_COUNT;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReadingError {
    #[error("no {0} reading has arrived since subscribing")]
    Missing(ReadingChannel),

    #[error("latest {channel} reading is {age_ms}ms old")]
    Stale { channel: ReadingChannel, age_ms: u128 },

    #[error("{channel} reading has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        channel: ReadingChannel,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("exported vector has length {0}, expected {EXPORT_VECTOR_LEN}")]
    VectorLength(usize),
}

/// A cached value with its arrival bookkeeping.
#[derive(Debug, Clone)]
pub struct Stamped<T> {
    pub value: T,
    pub version: u64,
    pub received_at: Instant,
}

pub(super) type Slot<T> = Option<Stamped<T>>;

struct FeedInner {
    raw: watch::Sender<Slot<Matrix>>,
    raw_unfiltered: watch::Sender<Slot<Matrix>>,
    psd: watch::Sender<Slot<Matrix>>,
    power_by_band: watch::Sender<Slot<Matrix>>,
    focus: watch::Sender<Slot<f64>>,
    calm: watch::Sender<Slot<f64>>,
}

/// Write half handed to the device source. Cheap to clone.
#[derive(Clone)]
pub struct DeviceFeed {
    inner: Arc<FeedInner>,
}

pub(super) fn publish<T>(tx: &watch::Sender<Slot<T>>, value: T) {
    tx.send_modify(|slot| {
        let version = slot.as_ref().map_or(1, |prev| prev.version + 1);
        *slot = Some(Stamped {
            value,
            version,
            received_at: Instant::now(),
        });
    });
}

impl DeviceFeed {
    pub fn push(&self, reading: DeviceReading) {
        match reading {
            DeviceReading::Raw(m) => publish(&self.inner.raw, m),
            DeviceReading::RawUnfiltered(m) => publish(&self.inner.raw_unfiltered, m),
            DeviceReading::Psd(m) => publish(&self.inner.psd, m),
            DeviceReading::PowerByBand(m) => publish(&self.inner.power_by_band, m),
            DeviceReading::Focus(p) => publish(&self.inner.focus, p),
            DeviceReading::Calm(p) => publish(&self.inner.calm, p),
        }
    }
}

/// The readings the accumulator consumes on one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct EegSnapshot {
    pub psd: Matrix,
    pub power_by_band: Matrix,
    pub focus: f64,
    pub calm: f64,
}

/// Read half: one receiver per channel.
#[derive(Clone)]
pub struct DeviceReadingCache {
    raw: watch::Receiver<Slot<Matrix>>,
    raw_unfiltered: watch::Receiver<Slot<Matrix>>,
    psd: watch::Receiver<Slot<Matrix>>,
    power_by_band: watch::Receiver<Slot<Matrix>>,
    focus: watch::Receiver<Slot<f64>>,
    calm: watch::Receiver<Slot<f64>>,
    max_age: Option<Duration>,
}

impl DeviceReadingCache {
    /// Creates an empty cache and the feed that fills it. Readings older than
    /// `max_age` are reported as stale; `None` disables the check.
    pub fn new(max_age: Option<Duration>) -> (DeviceFeed, Self) {
        let (raw_tx, raw) = watch::channel(None);
        let (raw_unfiltered_tx, raw_unfiltered) = watch::channel(None);
        let (psd_tx, psd) = watch::channel(None);
        let (power_by_band_tx, power_by_band) = watch::channel(None);
        let (focus_tx, focus) = watch::channel(None);
        let (calm_tx, calm) = watch::channel(None);

        let feed = DeviceFeed {
            inner: Arc::new(FeedInner {
                raw: raw_tx,
                raw_unfiltered: raw_unfiltered_tx,
                psd: psd_tx,
                power_by_band: power_by_band_tx,
                focus: focus_tx,
                calm: calm_tx,
            }),
        };

        let cache = Self {
            raw,
            raw_unfiltered,
            psd,
            power_by_band,
            focus,
            calm,
            max_age,
        };

        (feed, cache)
    }

    /// Version of the latest reading on `channel`, 0 when nothing arrived yet.
    pub fn version(&self, channel: ReadingChannel) -> u64 {
        fn v<T>(rx: &watch::Receiver<Slot<T>>) -> u64 {
            rx.borrow().as_ref().map_or(0, |s| s.version)
        }
        match channel {
            ReadingChannel::Raw => v(&self.raw),
            ReadingChannel::RawUnfiltered => v(&self.raw_unfiltered),
            ReadingChannel::Psd => v(&self.psd),
            ReadingChannel::PowerByBand => v(&self.power_by_band),
            ReadingChannel::Focus => v(&self.focus),
            ReadingChannel::Calm => v(&self.calm),
        }
    }

    fn latest<T: Clone>(
        &self,
        rx: &watch::Receiver<Slot<T>>,
        channel: ReadingChannel,
    ) -> Result<T, ReadingError> {
        let guard = rx.borrow();
        let stamped = guard.as_ref().ok_or(ReadingError::Missing(channel))?;
        if let Some(max_age) = self.max_age {
            let age = stamped.received_at.elapsed();
            if age > max_age {
                return Err(ReadingError::Stale {
                    channel,
                    age_ms: age.as_millis(),
                });
            }
        }
        Ok(stamped.value.clone())
    }

    /// Latest PSD, band power, focus and calm. Fails if any of them is
    /// missing or stale.
    pub fn snapshot(&self) -> Result<EegSnapshot, ReadingError> {
        Ok(EegSnapshot {
            psd: self.latest(&self.psd, ReadingChannel::Psd)?,
            power_by_band: self.latest(&self.power_by_band, ReadingChannel::PowerByBand)?,
            focus: self.latest(&self.focus, ReadingChannel::Focus)?,
            calm: self.latest(&self.calm, ReadingChannel::Calm)?,
        })
    }

    /// Flattens raw, raw-unfiltered, PSD and band power into one vector:
    ///
    /// - `0..128` raw
    /// - `128..256` raw unfiltered
    /// - `256..768` PSD
    /// - `768..808` band power
    pub fn export_vector(&self) -> Result<Vec<f64>, ReadingError> {
        let parts = [
            self.latest(&self.raw, ReadingChannel::Raw)?,
            self.latest(&self.raw_unfiltered, ReadingChannel::RawUnfiltered)?,
            self.latest(&self.psd, ReadingChannel::Psd)?,
            self.latest(&self.power_by_band, ReadingChannel::PowerByBand)?,
        ];

        let vector: Vec<f64> = parts.into_iter().flatten().flatten().collect();
        if vector.len() != EXPORT_VECTOR_LEN {
            return Err(ReadingError::VectorLength(vector.len()));
        }
        Ok(vector)
    }
}
