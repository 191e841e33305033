use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::correlation::{LoopConfig, LoopMode};
use crate::eeg::DEFAULT_PSD_BINS;

/// Tunables for a capture run. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CaptureSettings {
    pub tick_interval_ms: u64,
    pub psd_bins: usize,
    /// Electrodes allowed outside good/great before capture starts.
    pub max_fails: usize,
    pub required_passes: u32,
    /// Give up waiting for signal quality after this long. `None` waits forever.
    pub quality_timeout_secs: Option<u64>,
    pub max_reading_age_ms: u64,
    pub max_api_failures: u32,
    pub api_timeout_secs: u64,
    pub mode: LoopMode,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 250,
            psd_bins: DEFAULT_PSD_BINS,
            max_fails: 3,
            required_passes: 1,
            quality_timeout_secs: None,
            max_reading_age_ms: 5000,
            max_api_failures: 5,
            api_timeout_secs: 10,
            mode: LoopMode::Continuous,
        }
    }
}

impl CaptureSettings {
    /// Reads settings from `path`, or returns defaults when it does not exist.
    /// An unparsable file is reported and replaced by defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Ok(serde_json::from_str(&contents).unwrap_or_else(|err| {
            warn!("Ignoring malformed settings in {}: {err}", path.display());
            Self::default()
        }))
    }

    pub fn max_reading_age(&self) -> Option<Duration> {
        (self.max_reading_age_ms > 0).then(|| Duration::from_millis(self.max_reading_age_ms))
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            psd_bins: self.psd_bins,
            mode: self.mode,
            max_api_failures: self.max_api_failures.max(1),
        }
    }
}
