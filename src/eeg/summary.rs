use serde::{Deserialize, Serialize};

use crate::device::Matrix;

/// Physiological bands in the order the headband reports them. The index is
/// the row of the band-power matrix and is fixed by the vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Band {
    Alpha,
    Beta,
    Delta,
    Gamma,
    Theta,
}

impl Band {
    pub const ALL: [Band; 5] = [Band::Alpha, Band::Beta, Band::Delta, Band::Gamma, Band::Theta];

    pub fn index(&self) -> usize {
        match self {
            Band::Alpha => 0,
            Band::Beta => 1,
            Band::Delta => 2,
            Band::Gamma => 3,
            Band::Theta => 4,
        }
    }
}

/// Per-song means of everything gathered while the song played.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EegSummary {
    /// Mean PSD, one row per electrode, truncated to the configured bin count.
    pub psd: Matrix,
    pub alpha: Vec<f64>,
    pub beta: Vec<f64>,
    pub delta: Vec<f64>,
    pub gamma: Vec<f64>,
    pub theta: Vec<f64>,
    pub focus: f64,
    pub calm: f64,
    pub tick_count: usize,
}

impl EegSummary {
    pub fn band(&self, band: Band) -> &[f64] {
        match band {
            Band::Alpha => &self.alpha,
            Band::Beta => &self.beta,
            Band::Delta => &self.delta,
            Band::Gamma => &self.gamma,
            Band::Theta => &self.theta,
        }
    }

    pub fn psd_bins(&self) -> usize {
        self.psd.first().map_or(0, Vec::len)
    }

    /// Row-major flattening of the PSD matrix.
    pub fn psd_flat(&self) -> Vec<f64> {
        self.psd.iter().flatten().copied().collect()
    }
}
