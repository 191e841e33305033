use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::db::TrackRecord;
use crate::device::DeviceStatus;

/// Why a finished interval's EEG summary was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DropReason {
    DeviceOffline,
    NoActiveTrack,
    DeviceCharging,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DropReason::DeviceOffline => "headband was offline",
            DropReason::NoActiveTrack => "no song was playing",
            DropReason::DeviceCharging => "headband was charging",
        };
        f.write_str(text)
    }
}

/// Device status folded over the ticks of one track interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntervalHealth {
    pub observed_ticks: usize,
    pub offline_ticks: usize,
    pub charging_ticks: usize,
}

impl IntervalHealth {
    pub fn observe(&mut self, status: &DeviceStatus) {
        self.observed_ticks += 1;
        if !status.is_online() {
            self.offline_ticks += 1;
        }
        if status.charging {
            self.charging_ticks += 1;
        }
    }

    /// A status query that failed: nothing proves the headband was online.
    pub fn observe_unknown(&mut self) {
        self.observed_ticks += 1;
        self.offline_ticks += 1;
    }

    /// Decides whether the interval of `track_id` may be stored. Checked in
    /// order: offline, no track, charging.
    pub fn verdict<'a>(&self, track_id: Option<&'a str>) -> Result<&'a str, DropReason> {
        if self.offline_ticks > 0 {
            return Err(DropReason::DeviceOffline);
        }
        let track_id = track_id.ok_or(DropReason::NoActiveTrack)?;
        if self.charging_ticks > 0 {
            return Err(DropReason::DeviceCharging);
        }
        Ok(track_id)
    }
}

/// What the loop knows about the song currently being accumulated.
#[derive(Debug, Default)]
pub struct CorrelationState {
    pub active: Option<TrackRecord>,
    pub health: IntervalHealth,
    pub consecutive_api_failures: u32,
    /// Polls are skipped until this instant after a rate-limit response.
    pub rate_limited_until: Option<Instant>,
}

impl CorrelationState {
    pub fn active_id(&self) -> Option<&str> {
        self.active.as_ref().map(|t| t.id.as_str())
    }

    /// True when `current` names a different track than the active one,
    /// including starting or stopping playback.
    pub fn is_change(&self, current: Option<&TrackRecord>) -> bool {
        self.active_id() != current.map(|t| t.id.as_str())
    }
}
