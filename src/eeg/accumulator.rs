use thiserror::Error;

use crate::device::types::{BAND_COUNT, PSD_BINS};
use crate::device::{DeviceReadingCache, EegSnapshot, Matrix, ReadingChannel, ReadingError};

use super::summary::{Band, EegSummary};

/// PSD bins kept per electrode; the rest of the spectrum is discarded.
pub const DEFAULT_PSD_BINS: usize = 26;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AccumulatorError {
    #[error(transparent)]
    Reading(#[from] ReadingError),

    #[error("no EEG ticks were gathered for this track")]
    Empty,
}

/// Growing per-song buffers, appended once per polling tick.
#[derive(Debug, Clone)]
pub struct SongEegAccumulator {
    psd_bins: usize,
    psd: Vec<Matrix>,
    power_by_band: Vec<Matrix>,
    focus: Vec<f64>,
    calm: Vec<f64>,
}

fn shape_of(matrix: &Matrix, channel: ReadingChannel) -> Result<(usize, usize), ReadingError> {
    let rows = matrix.len();
    let cols = matrix.first().map_or(0, Vec::len);
    if let Some(row) = matrix.iter().find(|row| row.len() != cols) {
        return Err(ReadingError::ShapeMismatch {
            channel,
            expected: (rows, cols),
            actual: (rows, row.len()),
        });
    }
    Ok((rows, cols))
}

fn expect_shape(
    buffer: &[Matrix],
    actual: (usize, usize),
    channel: ReadingChannel,
) -> Result<(), ReadingError> {
    match buffer.first() {
        Some(first) => {
            let expected = (first.len(), first.first().map_or(0, Vec::len));
            if expected != actual {
                return Err(ReadingError::ShapeMismatch {
                    channel,
                    expected,
                    actual,
                });
            }
            Ok(())
        }
        None => Ok(()),
    }
}

/// Element-wise mean over the tick dimension.
fn mean_matrix(buffer: &[Matrix]) -> Matrix {
    let Some(first) = buffer.first() else {
        return Vec::new();
    };
    let n = buffer.len() as f64;
    let mut sums: Matrix = first.iter().map(|row| vec![0.0; row.len()]).collect();
    for matrix in buffer {
        for (sum_row, row) in sums.iter_mut().zip(matrix) {
            for (sum, value) in sum_row.iter_mut().zip(row) {
                *sum += value;
            }
        }
    }
    for row in sums.iter_mut() {
        for sum in row.iter_mut() {
            *sum /= n;
        }
    }
    sums
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

impl SongEegAccumulator {
    /// `psd_bins` is clamped to what the headband delivers (1 to 64).
    pub fn new(psd_bins: usize) -> Self {
        Self {
            psd_bins: psd_bins.clamp(1, PSD_BINS),
            psd: Vec::new(),
            power_by_band: Vec::new(),
            focus: Vec::new(),
            calm: Vec::new(),
        }
    }

    pub fn tick_count(&self) -> usize {
        self.psd.len()
    }

    pub fn is_empty(&self) -> bool {
        self.psd.is_empty()
    }

    /// Appends the latest cached readings. Nothing is appended if any
    /// channel is missing, stale or oddly shaped.
    pub fn gather_tick(&mut self, cache: &DeviceReadingCache) -> Result<(), AccumulatorError> {
        let snapshot = cache.snapshot()?;
        self.append(snapshot)
    }

    pub fn append(&mut self, snapshot: EegSnapshot) -> Result<(), AccumulatorError> {
        let (psd_rows, psd_cols) = shape_of(&snapshot.psd, ReadingChannel::Psd)?;
        if psd_rows == 0 || psd_cols < self.psd_bins {
            return Err(ReadingError::ShapeMismatch {
                channel: ReadingChannel::Psd,
                expected: (psd_rows.max(1), self.psd_bins),
                actual: (psd_rows, psd_cols),
            }
            .into());
        }
        let psd: Matrix = snapshot
            .psd
            .into_iter()
            .map(|row| row.into_iter().take(self.psd_bins).collect())
            .collect();
        expect_shape(&self.psd, (psd_rows, self.psd_bins), ReadingChannel::Psd)?;

        let band_shape = shape_of(&snapshot.power_by_band, ReadingChannel::PowerByBand)?;
        if band_shape.0 != BAND_COUNT {
            return Err(ReadingError::ShapeMismatch {
                channel: ReadingChannel::PowerByBand,
                expected: (BAND_COUNT, band_shape.1),
                actual: band_shape,
            }
            .into());
        }
        expect_shape(&self.power_by_band, band_shape, ReadingChannel::PowerByBand)?;

        self.psd.push(psd);
        self.power_by_band.push(snapshot.power_by_band);
        self.focus.push(snapshot.focus);
        self.calm.push(snapshot.calm);
        Ok(())
    }

    /// Reduces every buffer to its mean over the gathered ticks. State is
    /// left untouched; call [`reset`](Self::reset) afterwards.
    pub fn finalize(&self) -> Result<EegSummary, AccumulatorError> {
        if self.is_empty() {
            return Err(AccumulatorError::Empty);
        }

        let bands = mean_matrix(&self.power_by_band);
        let band = |b: Band| bands[b.index()].clone();

        Ok(EegSummary {
            psd: mean_matrix(&self.psd),
            alpha: band(Band::Alpha),
            beta: band(Band::Beta),
            delta: band(Band::Delta),
            gamma: band(Band::Gamma),
            theta: band(Band::Theta),
            focus: mean(&self.focus),
            calm: mean(&self.calm),
            tick_count: self.tick_count(),
        })
    }

    pub fn reset(&mut self) {
        self.psd.clear();
        self.power_by_band.clear();
        self.focus.clear();
        self.calm.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::CHANNEL_COUNT;
    use crate::device::DeviceReading;

    fn snapshot(psd_value: f64, focus: f64, calm: f64) -> EegSnapshot {
        EegSnapshot {
            psd: vec![vec![psd_value; PSD_BINS]; CHANNEL_COUNT],
            power_by_band: (1..=BAND_COUNT)
                .map(|b| vec![b as f64; CHANNEL_COUNT])
                .collect(),
            focus,
            calm,
        }
    }

    #[test]
    fn test_finalize_is_mean_of_ticks() {
        let mut acc = SongEegAccumulator::new(DEFAULT_PSD_BINS);
        acc.append(snapshot(1.0, 0.2, 0.9)).unwrap();
        acc.append(snapshot(2.0, 0.4, 0.6)).unwrap();
        acc.append(snapshot(6.0, 0.6, 0.3)).unwrap();

        let summary = acc.finalize().unwrap();
        assert_eq!(summary.tick_count, 3);
        assert_eq!(summary.psd.len(), CHANNEL_COUNT);
        assert_eq!(summary.psd_bins(), DEFAULT_PSD_BINS);
        assert!(summary.psd_flat().iter().all(|v| *v == 3.0));
        assert!((summary.focus - 0.4).abs() < 1e-12);
        assert!((summary.calm - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_band_means_follow_fixed_index_order() {
        let mut acc = SongEegAccumulator::new(DEFAULT_PSD_BINS);
        for _ in 0..3 {
            acc.append(snapshot(0.0, 0.5, 0.5)).unwrap();
        }

        let summary = acc.finalize().unwrap();
        assert_eq!(summary.alpha, vec![1.0; CHANNEL_COUNT]);
        assert_eq!(summary.beta, vec![2.0; CHANNEL_COUNT]);
        assert_eq!(summary.delta, vec![3.0; CHANNEL_COUNT]);
        assert_eq!(summary.gamma, vec![4.0; CHANNEL_COUNT]);
        assert_eq!(summary.theta, vec![5.0; CHANNEL_COUNT]);
        for band in Band::ALL {
            assert_eq!(summary.band(band), vec![(band.index() + 1) as f64; CHANNEL_COUNT]);
        }
    }

    #[test]
    fn test_band_means_are_per_channel() {
        let mut acc = SongEegAccumulator::new(DEFAULT_PSD_BINS);
        let mut first = snapshot(0.0, 0.0, 0.0);
        first.power_by_band[0] = (0..CHANNEL_COUNT).map(|c| c as f64).collect();
        let mut second = snapshot(0.0, 0.0, 0.0);
        second.power_by_band[0] = (0..CHANNEL_COUNT).map(|c| 3.0 * c as f64).collect();
        acc.append(first).unwrap();
        acc.append(second).unwrap();

        let summary = acc.finalize().unwrap();
        let expected: Vec<f64> = (0..CHANNEL_COUNT).map(|c| 2.0 * c as f64).collect();
        assert_eq!(summary.alpha, expected);
    }

    #[test]
    fn test_reset_then_finalize_is_empty() {
        let mut acc = SongEegAccumulator::new(DEFAULT_PSD_BINS);
        assert_eq!(acc.finalize().unwrap_err(), AccumulatorError::Empty);

        acc.append(snapshot(1.0, 0.5, 0.5)).unwrap();
        assert!(acc.finalize().is_ok());
        // finalize leaves the buffers in place
        assert_eq!(acc.tick_count(), 1);

        acc.reset();
        assert_eq!(acc.finalize().unwrap_err(), AccumulatorError::Empty);
    }

    #[test]
    fn test_psd_is_truncated() {
        let mut acc = SongEegAccumulator::new(4);
        let mut snap = snapshot(0.0, 0.5, 0.5);
        snap.psd = vec![(0..PSD_BINS).map(|b| b as f64).collect(); CHANNEL_COUNT];
        acc.append(snap).unwrap();

        let summary = acc.finalize().unwrap();
        assert_eq!(summary.psd[0], vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_shape_changes_are_rejected() {
        let mut acc = SongEegAccumulator::new(DEFAULT_PSD_BINS);
        acc.append(snapshot(1.0, 0.5, 0.5)).unwrap();

        let mut fewer_channels = snapshot(1.0, 0.5, 0.5);
        fewer_channels.psd.pop();
        assert!(matches!(
            acc.append(fewer_channels),
            Err(AccumulatorError::Reading(ReadingError::ShapeMismatch {
                channel: ReadingChannel::Psd,
                ..
            }))
        ));

        let mut four_bands = snapshot(1.0, 0.5, 0.5);
        four_bands.power_by_band.pop();
        assert!(matches!(
            acc.append(four_bands),
            Err(AccumulatorError::Reading(ReadingError::ShapeMismatch {
                channel: ReadingChannel::PowerByBand,
                ..
            }))
        ));

        let mut short_psd = snapshot(1.0, 0.5, 0.5);
        short_psd.psd = vec![vec![1.0; 10]; CHANNEL_COUNT];
        assert!(acc.append(short_psd).is_err());

        assert_eq!(acc.tick_count(), 1);
    }

    #[test]
    fn test_gather_tick_fails_on_missing_reading() {
        let (feed, cache) = DeviceReadingCache::new(None);
        let mut acc = SongEegAccumulator::new(DEFAULT_PSD_BINS);

        feed.push(DeviceReading::Psd(vec![vec![1.0; PSD_BINS]; CHANNEL_COUNT]));
        feed.push(DeviceReading::PowerByBand(vec![vec![1.0; CHANNEL_COUNT]; BAND_COUNT]));
        feed.push(DeviceReading::Calm(0.3));

        assert_eq!(
            acc.gather_tick(&cache).unwrap_err(),
            AccumulatorError::Reading(ReadingError::Missing(ReadingChannel::Focus))
        );
        assert!(acc.is_empty());

        feed.push(DeviceReading::Focus(0.7));
        acc.gather_tick(&cache).unwrap();
        assert_eq!(acc.tick_count(), 1);
    }

    #[test]
    fn test_bin_count_is_clamped() {
        let mut acc = SongEegAccumulator::new(0);
        acc.append(snapshot(2.0, 0.5, 0.5)).unwrap();
        let summary = acc.finalize().unwrap();
        assert_eq!(summary.psd_bins(), 1);
        assert_eq!(summary.psd, vec![vec![2.0]; CHANNEL_COUNT]);

        let mut acc = SongEegAccumulator::new(PSD_BINS + 10);
        acc.append(snapshot(2.0, 0.5, 0.5)).unwrap();
        assert_eq!(acc.finalize().unwrap().psd_bins(), PSD_BINS);
    }
}
