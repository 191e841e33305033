use serde::{Deserialize, Serialize};

/// Number of electrode channels on the headband.
pub const CHANNEL_COUNT: usize = 8;
/// Samples per channel in one raw / raw-unfiltered epoch.
pub const RAW_SAMPLES_PER_EPOCH: usize = 16;
/// Frequency bins per channel in a PSD epoch.
pub const PSD_BINS: usize = 64;
/// Number of physiological bands in a band-power reading.
pub const BAND_COUNT: usize = 5;

/// Channel matrix, rows are electrodes (or bands for band power).
pub type Matrix = Vec<Vec<f64>>;

/// One push from the headband, tagged by the channel it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceReading {
    Raw(Matrix),
    RawUnfiltered(Matrix),
    Psd(Matrix),
    PowerByBand(Matrix),
    Focus(f64),
    Calm(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadingChannel {
    Raw,
    RawUnfiltered,
    Psd,
    PowerByBand,
    Focus,
    Calm,
}

impl ReadingChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingChannel::Raw => "raw",
            ReadingChannel::RawUnfiltered => "raw_unfiltered",
            ReadingChannel::Psd => "psd",
            ReadingChannel::PowerByBand => "power_by_band",
            ReadingChannel::Focus => "focus",
            ReadingChannel::Calm => "calm",
        }
    }
}

impl std::fmt::Display for ReadingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceState {
    Online,
    Offline,
}

/// Result of the one-shot status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub state: DeviceState,
    pub charging: bool,
}

impl DeviceStatus {
    pub fn online() -> Self {
        Self {
            state: DeviceState::Online,
            charging: false,
        }
    }

    pub fn is_online(&self) -> bool {
        self.state == DeviceState::Online
    }
}

/// Contact quality the headband reports per electrode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContactQuality {
    Great,
    Good,
    Bad,
    NoContact,
}

impl ContactQuality {
    pub fn is_acceptable(&self) -> bool {
        matches!(self, ContactQuality::Great | ContactQuality::Good)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelQuality {
    pub status: ContactQuality,
    pub standard_deviation: f64,
}

/// One signal-quality report: an entry per electrode.
pub type QualityBatch = Vec<ChannelQuality>;
